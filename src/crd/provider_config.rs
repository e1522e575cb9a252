//! # ProviderConfig
//!
//! `ProviderConfig` points at the secret holding the account API token.
//! `ProviderConfigUsage` records which `StorageUser` depends on which config,
//! so a config cannot be deleted while in use.

use super::status::{Condition, ProviderConfigReference, SecretReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ProviderConfig Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ProviderConfig",
    group = "storage.microscaler.io",
    version = "v1",
    status = "ProviderConfigStatus",
    category = "objectstorage",
    printcolumn = r#"{"name":"Users", "type":"integer", "jsonPath":".status.users"}"#,
    printcolumn = r#"{"name":"Secret-Name", "type":"string", "priority":1, "jsonPath":".spec.credentials.apiTokenSecretRef.name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// Credentials used to talk to the account API
    pub credentials: ProviderCredentials,
}

/// Where the account API token is read from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// Secret containing the key `CLOUDSCALE_API_TOKEN`
    pub api_token_secret_ref: SecretReference,
}

/// Observed state of a `ProviderConfig`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Number of records currently using this config
    #[serde(default)]
    pub users: i64,
}

/// ProviderConfigUsage Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ProviderConfigUsage",
    group = "storage.microscaler.io",
    version = "v1",
    category = "objectstorage",
    printcolumn = r#"{"name":"Config-Name", "type":"string", "jsonPath":".spec.providerConfigRef.name"}"#,
    printcolumn = r#"{"name":"Resource-Kind", "type":"string", "jsonPath":".spec.resourceRef.kind"}"#,
    printcolumn = r#"{"name":"Resource-Name", "type":"string", "jsonPath":".spec.resourceRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigUsageSpec {
    /// Config being used
    pub provider_config_ref: ProviderConfigReference,
    /// Record using the config
    pub resource_ref: TypedReference,
}

/// Reference to a record of any kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}
