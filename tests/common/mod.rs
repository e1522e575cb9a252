//! In-memory stand-ins for the cluster, the S3 API and the account API.
//!
//! Every fake keeps its state behind a mutex so a test can inspect it between
//! reconciliations.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use objectstore_provisioner::constants::PROVIDER_CONFIG_LABEL;
use objectstore_provisioner::controller::events::{EventSink, LifecycleEvent};
use objectstore_provisioner::controller::store::{
    ProviderConfigStore, RecordStore, SecretStore, StoreError,
};
use objectstore_provisioner::crd::{ProviderConfig, ProviderConfigUsage};
use objectstore_provisioner::provider::{
    AccountApi, AccountApiError, AccountConnector, CloudObjectsUser, ListedObject,
    ObjectRemovalError, ObjectStorage, ObjectsUserRequest, S3Credentials, S3Endpoint,
    StorageConnector, StorageError,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Build secret data from string pairs
pub fn secret_data(entries: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

/// Read one value of a secret as UTF-8
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

/// Mark a record as being deleted
pub fn mark_deleted<K: Resource>(record: &mut K) {
    let time: Time = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
    record.meta_mut().deletion_timestamp = Some(time);
}

// ============================================================================
// Cluster
// ============================================================================

/// Last written state of every record, by name
pub struct FakeRecordStore<K> {
    records: Mutex<HashMap<String, K>>,
    version: Mutex<u64>,
}

impl<K: Clone + Resource> FakeRecordStore<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            version: Mutex::new(0),
        })
    }

    pub fn get(&self, name: &str) -> K {
        self.records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("record {name} was never written"))
    }

    pub fn writes(&self) -> u64 {
        *self.version.lock().unwrap()
    }

    fn save(&self, record: &mut K) {
        let mut version = self.version.lock().unwrap();
        *version += 1;
        record.meta_mut().resource_version = Some(version.to_string());
        self.records
            .lock()
            .unwrap()
            .insert(record.name_any(), record.clone());
    }
}

#[async_trait]
impl<K: Clone + Resource + Send + Sync> RecordStore<K> for FakeRecordStore<K> {
    async fn update_status(&self, record: &mut K) -> Result<()> {
        self.save(record);
        Ok(())
    }

    async fn update_metadata(&self, record: &mut K) -> Result<()> {
        self.save(record);
        Ok(())
    }
}

/// Secrets by `namespace/name`.
///
/// Deleting a secret that still carries finalizers only marks it as deleted,
/// like the API server does.
#[derive(Default)]
pub struct FakeSecretStore {
    secrets: Mutex<HashMap<(String, String), Secret>>,
}

impl FakeSecretStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, namespace: &str, name: &str, data: BTreeMap<String, ByteString>) {
        let mut secret = Secret {
            data: Some(data),
            ..Secret::default()
        };
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.name = Some(name.to_string());
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn find(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn key(secret: &Secret) -> (String, String) {
        (
            secret.namespace().unwrap_or_default(),
            secret.name_any(),
        )
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.find(namespace, name).ok_or_else(|| {
            StoreError::NotFound {
                kind: "Secret".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
            .into()
        })
    }

    async fn create(&self, secret: &Secret) -> Result<Secret> {
        let key = Self::key(secret);
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            bail!("secret {}/{} already exists", key.0, key.1);
        }
        secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret> {
        let key = Self::key(secret);
        let mut secrets = self.secrets.lock().unwrap();
        if !secrets.contains_key(&key) {
            return Err(StoreError::NotFound {
                kind: "Secret".to_string(),
                namespace: key.0,
                name: key.1,
            }
            .into());
        }
        // A marked secret goes away once its last finalizer is removed.
        if secret.metadata.deletion_timestamp.is_some() && secret.finalizers().is_empty() {
            secrets.remove(&key);
        } else {
            secrets.insert(key, secret.clone());
        }
        Ok(secret.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut secrets = self.secrets.lock().unwrap();
        let Some(secret) = secrets.get_mut(&key) else {
            return Err(StoreError::NotFound {
                kind: "Secret".to_string(),
                namespace: key.0,
                name: key.1,
            }
            .into());
        };
        if secret.finalizers().is_empty() {
            secrets.remove(&key);
        } else {
            mark_deleted(secret);
        }
        Ok(())
    }
}

/// `ProviderConfig`s and their usages
#[derive(Default)]
pub struct FakeProviderConfigStore {
    configs: Mutex<HashMap<String, ProviderConfig>>,
    usages: Mutex<BTreeMap<String, ProviderConfigUsage>>,
}

impl FakeProviderConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_config(&self, config: ProviderConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert(config.name_any(), config);
    }

    pub fn usages(&self) -> Vec<ProviderConfigUsage> {
        self.usages.lock().unwrap().values().cloned().collect()
    }

    pub fn remove_usage(&self, name: &str) {
        self.usages.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl ProviderConfigStore for FakeProviderConfigStore {
    async fn get_config(&self, name: &str) -> Result<ProviderConfig> {
        self.configs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound {
                    kind: "ProviderConfig".to_string(),
                    namespace: String::new(),
                    name: name.to_string(),
                }
                .into()
            })
    }

    async fn apply_usage(&self, usage: &ProviderConfigUsage) -> Result<()> {
        self.usages
            .lock()
            .unwrap()
            .insert(usage.name_any(), usage.clone());
        Ok(())
    }

    async fn list_usages(&self, config_name: &str) -> Result<Vec<ProviderConfigUsage>> {
        Ok(self
            .usages
            .lock()
            .unwrap()
            .values()
            .filter(|usage| {
                usage.labels().get(PROVIDER_CONFIG_LABEL).map(String::as_str) == Some(config_name)
            })
            .cloned()
            .collect())
    }
}

/// Published events as `(object name, event)`
#[derive(Default)]
pub struct FakeEventSink {
    events: Mutex<Vec<(String, LifecycleEvent)>>,
}

impl FakeEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.reason.clone())
            .collect()
    }

    pub fn last(&self) -> Option<LifecycleEvent> {
        self.events
            .lock()
            .unwrap()
            .last()
            .map(|(_, event)| event.clone())
    }
}

#[async_trait]
impl EventSink for FakeEventSink {
    async fn publish(&self, reference: &ObjectReference, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap()
            .push((reference.name.clone().unwrap_or_default(), event));
    }
}

// ============================================================================
// Object storage
// ============================================================================

/// Buckets with their region and object keys
#[derive(Default)]
pub struct FakeObjectStorage {
    buckets: Mutex<HashMap<String, (String, BTreeSet<String>)>>,
    /// Keys protected by an object lock
    locked: Mutex<HashSet<String>>,
    /// Buckets owned by another account
    foreign: Mutex<HashSet<String>>,
    /// `(endpoint URL, region, access key)` of every connect
    pub connects: Mutex<Vec<(String, String, String)>>,
}

impl FakeObjectStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn region_of(&self, bucket: &str) -> Option<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|(region, _)| region.clone())
    }

    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|(_, keys)| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn put_objects(&self, bucket: &str, count: usize) {
        let mut buckets = self.buckets.lock().unwrap();
        let (_, keys) = buckets
            .get_mut(bucket)
            .unwrap_or_else(|| panic!("bucket {bucket} does not exist"));
        for i in 0..count {
            keys.insert(format!("object-{i:05}"));
        }
    }

    /// Drop a bucket behind the controller's back
    pub fn remove_bucket(&self, bucket: &str) {
        self.buckets.lock().unwrap().remove(bucket);
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.lock().unwrap().keys().cloned().collect()
    }

    pub fn lock_object(&self, key: &str) {
        self.locked.lock().unwrap().insert(key.to_string());
    }

    pub fn add_foreign_bucket(&self, bucket: &str) {
        self.foreign.lock().unwrap().insert(bucket.to_string());
    }
}

#[async_trait]
impl ObjectStorage for FakeObjectStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        if self.foreign.lock().unwrap().contains(bucket) {
            return Err(StorageError::Rejected {
                code: "AccessDenied".to_string(),
                message: "Access Denied".to_string(),
            }
            .into());
        }
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        if self.foreign.lock().unwrap().contains(bucket) {
            return Err(StorageError::OwnedByOther {
                bucket: bucket.to_string(),
            }
            .into());
        }
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Err(StorageError::Rejected {
                code: "BucketAlreadyOwnedByYou".to_string(),
                message: "Your previous request to create the named bucket succeeded".to_string(),
            }
            .into());
        }
        buckets.insert(bucket.to_string(), (region.to_string(), BTreeSet::new()));
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.get(bucket) {
            None => Err(StorageError::Rejected {
                code: "NoSuchBucket".to_string(),
                message: "The specified bucket does not exist".to_string(),
            }
            .into()),
            Some((_, keys)) if !keys.is_empty() => Err(StorageError::Rejected {
                code: "BucketNotEmpty".to_string(),
                message: "The bucket you tried to delete is not empty".to_string(),
            }
            .into()),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_objects(&self, bucket: &str, tx: mpsc::Sender<ListedObject>) -> Result<()> {
        for key in self.objects(bucket) {
            if tx.send(ListedObject::new(key)).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
        _bypass_governance: bool,
    ) -> Result<Vec<ObjectRemovalError>> {
        let locked = self.locked.lock().unwrap().clone();
        let mut buckets = self.buckets.lock().unwrap();
        let (_, objects) = buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("bucket {bucket} does not exist"))?;
        let mut failures = Vec::new();
        for key in keys {
            if locked.contains(&key) {
                failures.push(ObjectRemovalError {
                    key,
                    message: "Access Denied because object protected by object lock".to_string(),
                });
            } else {
                objects.remove(&key);
            }
        }
        Ok(failures)
    }
}

/// Hands out the same [`FakeObjectStorage`] for every connect
pub struct FakeStorageConnector {
    pub storage: Arc<FakeObjectStorage>,
}

#[async_trait]
impl StorageConnector for FakeStorageConnector {
    async fn connect(
        &self,
        endpoint: &S3Endpoint,
        region: &str,
        credentials: &S3Credentials,
    ) -> Result<Arc<dyn ObjectStorage>> {
        self.storage.connects.lock().unwrap().push((
            endpoint.url(),
            region.to_string(),
            credentials.access_key_id.clone(),
        ));
        Ok(self.storage.clone())
    }
}

// ============================================================================
// Account API
// ============================================================================

/// Objects users by ID
#[derive(Default)]
pub struct FakeAccountApi {
    users: Mutex<BTreeMap<String, CloudObjectsUser>>,
    next_id: Mutex<u32>,
    /// Leave out the secret key of created users, like a read-only token does
    pub hide_secret_keys: Mutex<bool>,
    pub creates: Mutex<u32>,
}

impl FakeAccountApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user(&self, id: &str) -> Option<CloudObjectsUser> {
        self.users.lock().unwrap().get(id).cloned()
    }

    /// Remove a user behind the controller's back
    pub fn remove_user(&self, id: &str) {
        self.users.lock().unwrap().remove(id);
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn create_count(&self) -> u32 {
        *self.creates.lock().unwrap()
    }
}

#[async_trait]
impl AccountApi for FakeAccountApi {
    async fn create_objects_user(&self, request: &ObjectsUserRequest) -> Result<CloudObjectsUser> {
        *self.creates.lock().unwrap() += 1;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("user-{next}")
        };
        let mut keys = BTreeMap::from([("access_key".to_string(), format!("AK-{id}"))]);
        if !*self.hide_secret_keys.lock().unwrap() {
            keys.insert("secret_key".to_string(), format!("SK-{id}"));
        }
        let user = CloudObjectsUser {
            id: id.clone(),
            display_name: request.display_name.clone(),
            tags: request.tags.clone(),
            keys: vec![keys],
        };
        self.users.lock().unwrap().insert(id, user.clone());
        Ok(user)
    }

    async fn get_objects_user(&self, id: &str) -> Result<CloudObjectsUser> {
        self.user(id).ok_or_else(|| {
            AccountApiError::NotFound { id: id.to_string() }.into()
        })
    }

    async fn update_objects_user(&self, id: &str, request: &ObjectsUserRequest) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(id)
            .ok_or_else(|| AccountApiError::NotFound { id: id.to_string() })?;
        user.display_name = request.display_name.clone();
        user.tags = request.tags.clone();
        Ok(())
    }

    async fn delete_objects_user(&self, id: &str) -> Result<()> {
        match self.users.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(AccountApiError::NotFound { id: id.to_string() }.into()),
        }
    }
}

/// Hands out the same [`FakeAccountApi`] and remembers the tokens used
pub struct FakeAccountConnector {
    pub api: Arc<FakeAccountApi>,
    pub tokens: Mutex<Vec<String>>,
}

impl FakeAccountConnector {
    pub fn new(api: Arc<FakeAccountApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            tokens: Mutex::new(Vec::new()),
        })
    }
}

impl AccountConnector for FakeAccountConnector {
    fn connect(&self, token: &str) -> Result<Arc<dyn AccountApi>> {
        self.tokens.lock().unwrap().push(token.to_string());
        Ok(self.api.clone())
    }
}
