//! # Provider Modules
//!
//! Clients for the two external systems the controller talks to:
//! - `ObjectStorage`: the S3-compatible object storage API (bucket lifecycle)
//! - `AccountApi`: the cloud account API managing object-storage users
//!
//! Each API is reached through a connector that builds an authenticated client
//! from credentials read at reconcile time.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod cloudscale;
pub mod s3;

// ============================================================================
// Object storage
// ============================================================================

/// Errors reported by the object storage API
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket \"{bucket}\" already exists and is owned by another account")]
    OwnedByOther { bucket: String },

    #[error("bucket \"{bucket}\" already exists in a different region")]
    WrongRegion { bucket: String },

    /// Any other error response, `message` is shown verbatim
    #[error("{message}")]
    Rejected { code: String, message: String },

    #[error("object storage request failed: {0}")]
    Sdk(String),
}

/// One entry produced while listing a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    /// Set if this listing entry could not be read
    pub error: Option<String>,
}

impl ListedObject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: None,
        }
    }
}

/// An object the storage refused to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRemovalError {
    pub key: String,
    pub message: String,
}

/// Bucket-level operations on an S3-compatible API
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Stream every object key of the bucket into `tx`.
    ///
    /// Returns early without error once the receiver is dropped.
    async fn list_objects(&self, bucket: &str, tx: mpsc::Sender<ListedObject>) -> Result<()>;

    /// Delete a batch of objects, bypassing governance retention when requested.
    ///
    /// Returns the objects that could not be removed.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
        bypass_governance: bool,
    ) -> Result<Vec<ObjectRemovalError>>;
}

/// Access key pair of an object storage user
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Where the S3 API is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Endpoint {
    /// Host, with port if one was given
    pub host: String,
    /// Whether TLS is used
    pub secure: bool,
}

impl S3Endpoint {
    /// Parse an endpoint from a bucket spec.
    ///
    /// `http://host` disables TLS. Any other scheme, and a bare `host` without
    /// scheme, keep TLS enabled.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (host, secure) = if raw.contains("://") {
            let url = reqwest::Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("invalid endpoint URL {raw:?}: {e}"))?;
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            };
            (host, !url.scheme().eq_ignore_ascii_case("http"))
        } else {
            let host = raw.split('/').next().unwrap_or_default().to_string();
            (host, true)
        };
        if host.is_empty() {
            anyhow::bail!("endpoint URL {raw:?} does not contain a host");
        }
        Ok(Self { host, secure })
    }

    /// URL handed to the S3 client
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }
}

/// Builds object storage clients
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// `region` is used for request signing
    async fn connect(
        &self,
        endpoint: &S3Endpoint,
        region: &str,
        credentials: &S3Credentials,
    ) -> Result<Arc<dyn ObjectStorage>>;
}

// ============================================================================
// Account API
// ============================================================================

/// Errors reported by the account API
#[derive(Debug, Error)]
pub enum AccountApiError {
    #[error("objects user {id:?} not found")]
    NotFound { id: String },

    #[error("account API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("account API request failed: {0}")]
    Transport(String),
}

impl AccountApiError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccountApiError::NotFound { .. })
    }
}

/// An object storage user as returned by the account API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudObjectsUser {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Key pairs, each with `access_key` and `secret_key`
    #[serde(default)]
    pub keys: Vec<BTreeMap<String, String>>,
}

/// Body of create and update requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectsUserRequest {
    pub display_name: String,
    pub tags: BTreeMap<String, String>,
}

/// Object storage user endpoints of the account API
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn create_objects_user(&self, request: &ObjectsUserRequest) -> Result<CloudObjectsUser>;

    /// Fails with [`AccountApiError::NotFound`] for unknown IDs
    async fn get_objects_user(&self, id: &str) -> Result<CloudObjectsUser>;

    async fn update_objects_user(&self, id: &str, request: &ObjectsUserRequest) -> Result<()>;

    /// Fails with [`AccountApiError::NotFound`] for unknown IDs
    async fn delete_objects_user(&self, id: &str) -> Result<()>;
}

/// Builds account API clients from an API token
pub trait AccountConnector: Send + Sync {
    fn connect(&self, token: &str) -> Result<Arc<dyn AccountApi>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_with_http_scheme_disables_tls() {
        let endpoint = S3Endpoint::parse("http://host").unwrap();
        assert_eq!(endpoint.host, "host");
        assert!(!endpoint.secure);
        assert_eq!(endpoint.url(), "http://host");

        let upper = S3Endpoint::parse("HTTP://host:9000").unwrap();
        assert_eq!(upper.host, "host:9000");
        assert!(!upper.secure);
    }

    #[test]
    fn test_endpoint_with_https_scheme_keeps_tls() {
        let endpoint = S3Endpoint::parse("HTTPS://host").unwrap();
        assert_eq!(endpoint.host, "host");
        assert!(endpoint.secure);
    }

    #[test]
    fn test_endpoint_without_scheme_keeps_tls() {
        let endpoint = S3Endpoint::parse("host").unwrap();
        assert_eq!(endpoint.host, "host");
        assert!(endpoint.secure);
        assert_eq!(endpoint.url(), "https://host");

        let with_path = S3Endpoint::parse("objects.example.com/some/path").unwrap();
        assert_eq!(with_path.host, "objects.example.com");
    }

    #[test]
    fn test_endpoint_without_host_is_rejected() {
        assert!(S3Endpoint::parse("").is_err());
        assert!(S3Endpoint::parse("/path-only").is_err());
    }

    #[test]
    fn test_rejected_storage_error_is_shown_verbatim() {
        let err = StorageError::Rejected {
            code: "BucketNotEmpty".to_string(),
            message: "The bucket you tried to delete is not empty".to_string(),
        };
        assert_eq!(err.to_string(), "The bucket you tried to delete is not empty");
    }

    #[test]
    fn test_objects_user_deserializes_api_payload() {
        let json = serde_json::json!({
            "href": "https://api.cloudscale.ch/v1/objects-users/abc",
            "id": "abc",
            "display_name": "alice",
            "keys": [{"access_key": "AK", "secret_key": "SK"}],
            "tags": {"team": "storage"}
        });
        let user: CloudObjectsUser = serde_json::from_value(json).unwrap();
        assert_eq!(user.id, "abc");
        assert_eq!(user.keys[0]["access_key"], "AK");
        assert_eq!(user.tags["team"], "storage");
    }
}
