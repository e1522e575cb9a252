//! # Storage-User Lifecycle
//!
//! Provisions object storage users on the account API for `StorageUser` records
//! and writes their S3 key pair into a credentials secret.
//!
//! The account API allows several users with the same display name, so the ID
//! returned by create is the only reliable handle. It is stored in the
//! `storage.microscaler.io/user-id` annotation right after creation and promoted
//! to `status.userId` by the next observe.

mod connect;
mod create;
mod delete;
mod observe;
pub mod tags;
mod update;

use crate::constants::{
    ACCESS_KEY_ID_NAME, API_GROUP, SECRET_ACCESS_KEY_NAME, USER_FINALIZER, USER_ID_ANNOTATION,
};
use crate::controller::events::{EventSink, LifecycleEvent};
use crate::controller::managed::{ExternalClient, Observation, ReconcileContext};
use crate::controller::pipeline::ignore_not_found;
use crate::controller::store::{self, ProviderConfigStore, RecordStore, SecretStore};
use crate::crd::{SecretReference, StorageUser};
use crate::provider::{AccountApi, AccountConnector, CloudObjectsUser};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds [`UserClient`]s for `StorageUser` records
#[derive(Clone)]
pub struct UserConnector {
    configs: Arc<dyn ProviderConfigStore>,
    secrets: Arc<dyn SecretStore>,
    accounts: Arc<dyn AccountConnector>,
    records: Arc<dyn RecordStore<StorageUser>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for UserConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConnector").finish_non_exhaustive()
    }
}

impl UserConnector {
    pub fn new(
        configs: Arc<dyn ProviderConfigStore>,
        secrets: Arc<dyn SecretStore>,
        accounts: Arc<dyn AccountConnector>,
        records: Arc<dyn RecordStore<StorageUser>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            configs,
            secrets,
            accounts,
            records,
            events,
        }
    }
}

/// Account API client of one `StorageUser`
#[derive(Clone)]
pub struct UserClient {
    api: Arc<dyn AccountApi>,
    secrets: Arc<dyn SecretStore>,
    records: Arc<dyn RecordStore<StorageUser>>,
    events: Arc<dyn EventSink>,
}

impl UserClient {
    fn context(&self, record: &StorageUser, cloud_user: CloudObjectsUser) -> UserContext {
        UserContext {
            record: record.clone(),
            cloud_user,
            api: self.api.clone(),
            secrets: self.secrets.clone(),
            records: self.records.clone(),
            events: self.events.clone(),
        }
    }
}

/// State shared by the steps of a user pipeline
pub struct UserContext {
    pub record: StorageUser,
    /// The user as last returned by the account API, empty until fetched or created
    pub cloud_user: CloudObjectsUser,
    pub api: Arc<dyn AccountApi>,
    pub secrets: Arc<dyn SecretStore>,
    pub records: Arc<dyn RecordStore<StorageUser>>,
    pub events: Arc<dyn EventSink>,
}

impl ReconcileContext for UserContext {
    type Record = StorageUser;

    fn record(&mut self) -> &mut StorageUser {
        &mut self.record
    }

    fn records(&self) -> Arc<dyn RecordStore<StorageUser>> {
        self.records.clone()
    }

    fn events(&self) -> Arc<dyn EventSink> {
        self.events.clone()
    }
}

impl UserContext {
    async fn emit(&self, event: LifecycleEvent) {
        self.events
            .publish(&self.record.object_ref(&()), event)
            .await;
    }
}

/// Display name sent to the account API
#[must_use]
pub fn display_name(record: &StorageUser) -> String {
    match record.namespace() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}.{}", record.name_any()),
        _ => record.name_any(),
    }
}

/// ID from status, falling back to the annotation written at creation
#[must_use]
pub fn user_id(record: &StorageUser) -> Option<String> {
    record
        .observed_user_id()
        .or_else(|| {
            record
                .annotations()
                .get(USER_ID_ANNOTATION)
                .map(String::as_str)
                .filter(|id| !id.is_empty())
        })
        .map(str::to_string)
}

/// Key pair of the first key of a user, empty where the API returned nothing
fn connection_details(cloud_user: &CloudObjectsUser) -> BTreeMap<String, ByteString> {
    let key = |name: &str| {
        cloud_user
            .keys
            .first()
            .and_then(|keys| keys.get(name))
            .cloned()
            .unwrap_or_default()
    };
    BTreeMap::from([
        (ACCESS_KEY_ID_NAME.to_string(), ByteString(key("access_key").into_bytes())),
        (SECRET_ACCESS_KEY_NAME.to_string(), ByteString(key("secret_key").into_bytes())),
    ])
}

/// Recommended labels of a credentials secret
fn common_labels(user_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/instance".to_string(), user_name.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), API_GROUP.to_string()),
        (
            "app.kubernetes.io/created-by".to_string(),
            "controller-storageuser".to_string(),
        ),
    ])
}

/// Whether `secret` holds the key pair of `cloud_user`
fn credentials_secret_matches(secret: &Secret, cloud_user: &CloudObjectsUser) -> bool {
    let Some(data) = secret.data.as_ref() else {
        return false;
    };
    connection_details(cloud_user)
        .iter()
        .all(|(key, value)| data.get(key) == Some(value))
}

/// Whether `secret` has an owner reference to `record`
fn is_owned_by(secret: &Secret, record: &StorageUser) -> bool {
    let api_version = StorageUser::api_version(&());
    let kind = StorageUser::kind(&());
    secret.owner_references().iter().any(|owner| {
        owner.api_version == api_version && owner.kind == kind && owner.name == record.name_any()
    })
}

/// Drop this controller's finalizer from a credentials secret
async fn release_secret(secrets: &dyn SecretStore, secret_ref: &SecretReference) -> Result<()> {
    let mut secret = secrets.get(&secret_ref.namespace, &secret_ref.name).await?;
    let before = secret.finalizers().len();
    secret.finalizers_mut().retain(|f| f != USER_FINALIZER);
    if secret.finalizers().len() != before {
        secrets.replace(&secret).await?;
        debug!(secret = %secret_ref, "released credentials secret");
    }
    Ok(())
}

/// Write the user's key pair into the requested secret and remember where it went
async fn ensure_credentials_secret(ctx: &mut UserContext) -> Result<()> {
    let Some(secret_ref) = ctx.record.spec.write_connection_secret_to_ref.clone() else {
        return Ok(());
    };

    // A secret written under a previous reference is no longer ours to protect.
    if let Some(previous) = ctx.record.written_secret_ref().cloned() {
        if previous != secret_ref {
            release_secret(ctx.secrets.as_ref(), &previous)
                .await
                .or_else(ignore_not_found)?;
        }
    }

    let data = connection_details(&ctx.cloud_user);
    let labels = common_labels(&ctx.record.name_any());
    let owner = ctx.record.controller_owner_ref(&());
    store::create_or_update(
        ctx.secrets.as_ref(),
        &secret_ref.namespace,
        &secret_ref.name,
        move |secret| {
            secret.labels_mut().extend(labels);
            secret.data.get_or_insert_with(BTreeMap::new).extend(data);
            if let Some(owner) = owner {
                let refs = secret.metadata.owner_references.get_or_insert_with(Vec::new);
                if !refs.iter().any(|r| r.uid == owner.uid) {
                    refs.push(owner);
                }
            }
            if !secret.finalizers().iter().any(|f| f == USER_FINALIZER) {
                secret.finalizers_mut().push(USER_FINALIZER.to_string());
            }
        },
    )
    .await?;

    debug!(secret = %secret_ref, "ensured credentials secret");
    ctx.record.status_mut().connection_secret_ref = Some(secret_ref);
    Ok(())
}

#[async_trait]
impl ExternalClient<StorageUser> for UserClient {
    type Observed = CloudObjectsUser;

    async fn observe(&self, record: &mut StorageUser) -> Result<Observation<CloudObjectsUser>> {
        observe::observe(self, record).await
    }

    async fn create(&self, record: &mut StorageUser) -> Result<()> {
        if record.observed_user_id().is_some() {
            debug!("user ID already recorded, skipping creation");
            return Ok(());
        }
        let mut ctx = self.context(record, CloudObjectsUser::default());
        let result = create::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }

    async fn update(&self, record: &mut StorageUser, observed: CloudObjectsUser) -> Result<()> {
        let mut ctx = self.context(record, observed);
        let result = update::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }

    async fn delete(&self, record: &mut StorageUser) -> Result<()> {
        let mut ctx = self.context(record, CloudObjectsUser::default());
        let result = delete::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }
}
