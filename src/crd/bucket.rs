//! # Bucket
//!
//! A `Bucket` describes one S3 bucket on an S3-compatible endpoint.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: storage.microscaler.io/v1
//! kind: Bucket
//! metadata:
//!   name: my-app-assets
//! spec:
//!   credentialsSecretRef:
//!     name: my-app-user-credentials
//!     namespace: my-app
//!   endpointUrl: https://objects.rma.cloudscale.ch
//!   region: rma
//!   bucketDeletionPolicy: DeleteIfEmpty
//!   writeConnectionSecretToRef:
//!     name: my-app-bucket
//!     namespace: my-app
//! ```

use super::status::{Condition, SecretReference};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bucket Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Bucket",
    group = "storage.microscaler.io",
    version = "v1",
    status = "BucketStatus",
    shortname = "bkt",
    category = "objectstorage",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Bucket Name", "type":"string", "jsonPath":".status.bucketName"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.endpoint"}"#,
    printcolumn = r#"{"name":"Region", "type":"string", "jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Secret holding the S3 credentials of the user that owns the bucket.
    /// The secret must contain the keys `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    pub credentials_secret_ref: SecretReference,
    /// URL of the S3 endpoint, e.g. `https://objects.rma.cloudscale.ch`.
    /// TLS is used unless the scheme is `http`.
    pub endpoint_url: String,
    /// Name of the bucket to create. Defaults to `metadata.name`.
    /// Cannot be changed after the bucket is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Region in which the bucket is created.
    /// Cannot be changed after the bucket is created.
    pub region: String,
    /// What happens to the bucket contents when the record is deleted
    #[serde(default)]
    pub bucket_deletion_policy: BucketDeletionPolicy,
    /// Secret receiving the connection details (endpoint, region, bucket name and keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
}

/// Determines how buckets are deleted when the `Bucket` record is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BucketDeletionPolicy {
    /// Only delete the bucket if it is empty
    #[default]
    DeleteIfEmpty,
    /// Recursively delete all objects in the bucket, then remove it
    DeleteAll,
}

/// Observed state of a `Bucket`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Name of the bucket that was actually provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Region the bucket was provisioned in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Host of the S3 endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Full URL of the S3 endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl Bucket {
    /// Returns `spec.bucketName` if given, otherwise `metadata.name`
    #[must_use]
    pub fn bucket_name(&self) -> String {
        match self.spec.bucket_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.name_any(),
        }
    }

    /// Name of the bucket recorded in status, if any was provisioned
    #[must_use]
    pub fn observed_bucket_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bucket_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Region recorded in status, if any was provisioned
    #[must_use]
    pub fn observed_region(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.region.as_deref())
            .filter(|region| !region.is_empty())
    }

    /// Status, created on first access
    pub fn status_mut(&mut self) -> &mut BucketStatus {
        self.status.get_or_insert_with(BucketStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BucketSpec {
        BucketSpec {
            credentials_secret_ref: SecretReference::new("default", "creds"),
            endpoint_url: "https://objects.example.com".to_string(),
            bucket_name: None,
            region: "rma".to_string(),
            bucket_deletion_policy: BucketDeletionPolicy::default(),
            write_connection_secret_to_ref: None,
        }
    }

    #[test]
    fn test_bucket_name_defaults_to_metadata_name() {
        let bucket = Bucket::new("assets", spec());
        assert_eq!(bucket.bucket_name(), "assets");

        let mut named = spec();
        named.bucket_name = Some("custom".to_string());
        assert_eq!(Bucket::new("assets", named).bucket_name(), "custom");

        let mut empty = spec();
        empty.bucket_name = Some(String::new());
        assert_eq!(Bucket::new("assets", empty).bucket_name(), "assets");
    }

    #[test]
    fn test_deletion_policy_defaults_to_delete_if_empty() {
        let json = serde_json::json!({
            "credentialsSecretRef": {"name": "creds", "namespace": "default"},
            "endpointUrl": "objects.example.com",
            "region": "lpg"
        });
        let spec: BucketSpec = serde_json::from_value(json).expect("spec should deserialize");
        assert_eq!(spec.bucket_deletion_policy, BucketDeletionPolicy::DeleteIfEmpty);

        let all: BucketDeletionPolicy =
            serde_json::from_value(serde_json::json!("DeleteAll")).expect("policy");
        assert_eq!(all, BucketDeletionPolicy::DeleteAll);
    }

    #[test]
    fn test_observed_values_ignore_empty_strings() {
        let mut bucket = Bucket::new("assets", spec());
        assert_eq!(bucket.observed_bucket_name(), None);

        bucket.status_mut().bucket_name = Some(String::new());
        assert_eq!(bucket.observed_bucket_name(), None);

        bucket.status_mut().bucket_name = Some("assets".to_string());
        bucket.status_mut().region = Some("rma".to_string());
        assert_eq!(bucket.observed_bucket_name(), Some("assets"));
        assert_eq!(bucket.observed_region(), Some("rma"));
    }
}
