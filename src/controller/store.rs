//! # Stores
//!
//! Access to records and secrets in the cluster.
//!
//! Lifecycle code only talks to the traits in this module, so it can run against
//! in-memory stores in tests.

use crate::constants::{FIELD_MANAGER, PROVIDER_CONFIG_LABEL};
use crate::crd::{ProviderConfig, ProviderConfigUsage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Errors raised by the stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} \"{name}\" not found in namespace {namespace:?}")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} \"{name}\" was modified concurrently, resourceVersion is outdated")]
    Conflict { kind: String, name: String },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StoreError {
    fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => StoreError::Kube(other),
        }
    }
}

/// Whether any error in the chain means "the object does not exist"
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(store_err) = cause.downcast_ref::<StoreError>() {
            return match store_err {
                StoreError::NotFound { .. } => true,
                StoreError::Kube(kube::Error::Api(resp)) => resp.code == 404,
                _ => false,
            };
        }
        if let Some(kube::Error::Api(resp)) = cause.downcast_ref::<kube::Error>() {
            return resp.code == 404;
        }
        if let Some(api_err) = cause.downcast_ref::<crate::provider::AccountApiError>() {
            return api_err.is_not_found();
        }
        false
    })
}

/// Writes the status and metadata of a record.
///
/// Both writes carry the record's `resourceVersion` and refresh it from the response,
/// so a record can be written several times in one reconciliation.
#[async_trait]
pub trait RecordStore<K>: Send + Sync {
    async fn update_status(&self, record: &mut K) -> Result<()>;

    /// Persists finalizers and annotations
    async fn update_metadata(&self, record: &mut K) -> Result<()>;
}

/// Create, read, replace and delete Secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fails with [`StoreError::NotFound`] if the secret doesn't exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret>;
    async fn create(&self, secret: &Secret) -> Result<Secret>;
    async fn replace(&self, secret: &Secret) -> Result<Secret>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// `ProviderConfig` lookups and usage tracking
#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn get_config(&self, name: &str) -> Result<ProviderConfig>;

    /// Creates or updates the usage record
    async fn apply_usage(&self, usage: &ProviderConfigUsage) -> Result<()>;

    /// Usages labelled with the given config name
    async fn list_usages(&self, config_name: &str) -> Result<Vec<ProviderConfigUsage>>;
}

/// Fetch a secret, let `mutate` edit it and write it back.
///
/// A missing secret is created with the given name and namespace.
pub async fn create_or_update<F>(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Secret>
where
    F: FnOnce(&mut Secret) + Send,
{
    match store.get(namespace, name).await {
        Ok(mut secret) => {
            mutate(&mut secret);
            store.replace(&secret).await
        }
        Err(err) if is_not_found(&err) => {
            let mut secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                ..Secret::default()
            };
            mutate(&mut secret);
            store.create(&secret).await
        }
        Err(err) => Err(err),
    }
}

/// Record store backed by the Kubernetes API
pub struct KubeRecordStore<K: Resource> {
    api: Api<K>,
}

impl<K: Resource> Debug for KubeRecordStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRecordStore").finish_non_exhaustive()
    }
}

impl<K: Resource<DynamicType = ()>> KubeRecordStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl<K> RecordStore<K> for KubeRecordStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn update_status(&self, record: &mut K) -> Result<()> {
        let name = record.name_any();
        let status = serde_json::to_value(&*record)
            .context("failed to serialize record")?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        // Server-side apply drops status fields this manager no longer sets.
        let patch = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "metadata": {
                "name": name,
                "resourceVersion": record.resource_version(),
            },
            "status": status,
        });
        let updated = self
            .api
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| StoreError::from_kube(e, &K::kind(&()), "", &name))?;
        record.meta_mut().resource_version = updated.resource_version();
        Ok(())
    }

    async fn update_metadata(&self, record: &mut K) -> Result<()> {
        let name = record.name_any();
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": record.resource_version(),
                "finalizers": record.finalizers(),
                "annotations": record.annotations(),
            }
        });
        let updated = self
            .api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &K::kind(&()), "", &name))?;
        record.meta_mut().resource_version = updated.resource_version();
        Ok(())
    }
}

/// Secret store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", namespace, name).into())
    }

    async fn create(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        self.api(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", &namespace, &secret.name_any()).into())
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", &namespace, &name).into())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, "Secret", namespace, name).into())
    }
}

/// `ProviderConfig` store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeProviderConfigStore {
    configs: Api<ProviderConfig>,
    usages: Api<ProviderConfigUsage>,
}

impl Debug for KubeProviderConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProviderConfigStore").finish_non_exhaustive()
    }
}

impl KubeProviderConfigStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            configs: Api::all(client.clone()),
            usages: Api::all(client),
        }
    }
}

#[async_trait]
impl ProviderConfigStore for KubeProviderConfigStore {
    async fn get_config(&self, name: &str) -> Result<ProviderConfig> {
        self.configs
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "ProviderConfig", "", name).into())
    }

    async fn apply_usage(&self, usage: &ProviderConfigUsage) -> Result<()> {
        let name = usage.name_any();
        self.usages
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(usage),
            )
            .await
            .map_err(|e| StoreError::from_kube(e, "ProviderConfigUsage", "", &name))?;
        Ok(())
    }

    async fn list_usages(&self, config_name: &str) -> Result<Vec<ProviderConfigUsage>> {
        let params = ListParams::default().labels(&format!("{PROVIDER_CONFIG_LABEL}={config_name}"));
        let list = self
            .usages
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, "ProviderConfigUsage", "", config_name))?;
        Ok(list.items)
    }
}
