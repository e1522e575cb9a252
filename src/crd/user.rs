//! # StorageUser
//!
//! A `StorageUser` is an object-storage user on the account API. Its S3 key pair
//! can be written to a connection secret for use by `Bucket` records.

use super::status::{Condition, ProviderConfigReference, SecretReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// StorageUser Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "StorageUser",
    group = "storage.microscaler.io",
    version = "v1",
    status = "StorageUserStatus",
    shortname = "su",
    category = "objectstorage",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Display Name", "type":"string", "jsonPath":".status.displayName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageUserSpec {
    /// Tags attached to the user
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// `ProviderConfig` holding the account API token
    #[serde(default)]
    pub provider_config_ref: ProviderConfigReference,
    /// Secret receiving the user's S3 key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
}

/// Observed state of a `StorageUser`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageUserStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// ID of the user on the account API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Display name reported by the account API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Tags reported by the account API
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Secret last written with the user's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret_ref: Option<SecretReference>,
}

impl StorageUser {
    /// User ID recorded in status, if the user was observed
    #[must_use]
    pub fn observed_user_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.user_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Secret last written by this record
    #[must_use]
    pub fn written_secret_ref(&self) -> Option<&SecretReference> {
        self.status
            .as_ref()
            .and_then(|s| s.connection_secret_ref.as_ref())
    }

    /// Status, created on first access
    pub fn status_mut(&mut self) -> &mut StorageUserStatus {
        self.status.get_or_insert_with(StorageUserStatus::default)
    }
}
