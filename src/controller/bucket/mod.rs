//! # Bucket Lifecycle
//!
//! Provisions S3 buckets for `Bucket` records.
//!
//! - `connect`: reads the user credentials and builds the S3 client
//! - `observe`: rename and region guards, existence check
//! - `create` / `update` / `delete`: lifecycle pipelines
//! - `webhook`: admission validation

mod connect;
mod create;
mod delete;
mod observe;
mod update;
pub mod webhook;

use crate::constants::{
    ACCESS_KEY_ID_NAME, BUCKET_NAME, ENDPOINT_NAME, REGION_NAME, SECRET_ACCESS_KEY_NAME,
};
use crate::controller::events::{EventSink, LifecycleEvent};
use crate::controller::managed::{ExternalClient, Observation, ReconcileContext};
use crate::controller::store::{self, RecordStore, SecretStore};
use crate::crd::Bucket;
use crate::provider::{ObjectStorage, S3Credentials, S3Endpoint, StorageConnector};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds [`BucketClient`]s for `Bucket` records
#[derive(Clone)]
pub struct BucketConnector {
    secrets: Arc<dyn SecretStore>,
    storage: Arc<dyn StorageConnector>,
    records: Arc<dyn RecordStore<Bucket>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for BucketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketConnector").finish_non_exhaustive()
    }
}

impl BucketConnector {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        storage: Arc<dyn StorageConnector>,
        records: Arc<dyn RecordStore<Bucket>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            secrets,
            storage,
            records,
            events,
        }
    }
}

/// External client of one `Bucket`
pub enum BucketClient {
    Connected(ConnectedBucket),
    /// The bucket was removed by an earlier deletion pass.
    /// Observes as existing and up to date, every operation is a no-op.
    Disconnected,
}

/// S3 client plus everything the lifecycle pipelines need
#[derive(Clone)]
pub struct ConnectedBucket {
    storage: Arc<dyn ObjectStorage>,
    credentials: S3Credentials,
    endpoint: S3Endpoint,
    secrets: Arc<dyn SecretStore>,
    records: Arc<dyn RecordStore<Bucket>>,
    events: Arc<dyn EventSink>,
}

impl ConnectedBucket {
    fn context(&self, record: &Bucket) -> BucketContext {
        BucketContext {
            record: record.clone(),
            storage: self.storage.clone(),
            credentials: self.credentials.clone(),
            endpoint: self.endpoint.clone(),
            secrets: self.secrets.clone(),
            records: self.records.clone(),
            events: self.events.clone(),
            bucket_present: true,
        }
    }
}

/// State shared by the steps of a bucket pipeline
pub struct BucketContext {
    pub record: Bucket,
    pub storage: Arc<dyn ObjectStorage>,
    pub credentials: S3Credentials,
    pub endpoint: S3Endpoint,
    pub secrets: Arc<dyn SecretStore>,
    pub records: Arc<dyn RecordStore<Bucket>>,
    pub events: Arc<dyn EventSink>,
    /// Cleared by the deletion pipeline once the bucket turns out to be gone
    pub bucket_present: bool,
}

impl ReconcileContext for BucketContext {
    type Record = Bucket;

    fn record(&mut self) -> &mut Bucket {
        &mut self.record
    }

    fn records(&self) -> Arc<dyn RecordStore<Bucket>> {
        self.records.clone()
    }

    fn events(&self) -> Arc<dyn EventSink> {
        self.events.clone()
    }
}

impl BucketContext {
    async fn emit(&self, event: LifecycleEvent) {
        self.events
            .publish(&self.record.object_ref(&()), event)
            .await;
    }

    /// Write the bucket connection details into the requested secret
    async fn ensure_connection_secret(&mut self) -> Result<()> {
        let Some(secret_ref) = self.record.spec.write_connection_secret_to_ref.clone() else {
            return Ok(());
        };
        let data = connection_secret_data(&self.record, &self.credentials);
        let owner = self.record.controller_owner_ref(&());
        store::create_or_update(
            self.secrets.as_ref(),
            &secret_ref.namespace,
            &secret_ref.name,
            move |secret| {
                secret.data = Some(data);
                if let Some(owner) = owner {
                    let refs = secret.metadata.owner_references.get_or_insert_with(Vec::new);
                    if !refs.iter().any(|r| r.uid == owner.uid) {
                        refs.push(owner);
                    }
                }
            },
        )
        .await?;
        debug!(secret = %secret_ref, "wrote bucket connection secret");
        Ok(())
    }
}

/// Keys and values of the bucket connection secret
fn connection_secret_data(
    record: &Bucket,
    credentials: &S3Credentials,
) -> BTreeMap<String, ByteString> {
    let entry = |key: &str, value: &str| (key.to_string(), ByteString(value.as_bytes().to_vec()));
    BTreeMap::from([
        entry(ACCESS_KEY_ID_NAME, &credentials.access_key_id),
        entry(SECRET_ACCESS_KEY_NAME, &credentials.secret_access_key),
        entry(ENDPOINT_NAME, &record.spec.endpoint_url),
        entry(REGION_NAME, &record.spec.region),
        entry(BUCKET_NAME, &record.bucket_name()),
    ])
}

/// Whether `secret` carries exactly the connection details of `record`
fn connection_secret_matches(secret: &Secret, record: &Bucket, credentials: &S3Credentials) -> bool {
    let desired = connection_secret_data(record, credentials);
    secret.data.as_ref() == Some(&desired)
}

/// Record what was provisioned in the bucket status
fn record_provisioned(record: &mut Bucket, endpoint: &S3Endpoint) {
    let bucket_name = record.bucket_name();
    let region = record.spec.region.clone();
    let endpoint_url = record.spec.endpoint_url.clone();
    let status = record.status_mut();
    status.bucket_name = Some(bucket_name);
    status.region = Some(region);
    status.endpoint = Some(endpoint.host.clone());
    status.endpoint_url = Some(endpoint_url);
}

#[async_trait]
impl ExternalClient<Bucket> for BucketClient {
    type Observed = ();

    async fn observe(&self, record: &mut Bucket) -> Result<Observation<()>> {
        match self {
            BucketClient::Connected(client) => observe::observe(client, record).await,
            BucketClient::Disconnected => Ok(Observation::Exists {
                up_to_date: true,
                observed: (),
            }),
        }
    }

    async fn create(&self, record: &mut Bucket) -> Result<()> {
        let BucketClient::Connected(client) = self else {
            return Ok(());
        };
        let mut ctx = client.context(record);
        let result = create::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }

    async fn update(&self, record: &mut Bucket, _observed: ()) -> Result<()> {
        let BucketClient::Connected(client) = self else {
            return Ok(());
        };
        let mut ctx = client.context(record);
        let result = update::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }

    async fn delete(&self, record: &mut Bucket) -> Result<()> {
        let BucketClient::Connected(client) = self else {
            debug!("bucket already deleted, skipping");
            return Ok(());
        };
        let mut ctx = client.context(record);
        let result = delete::pipeline().run(&mut ctx).await;
        *record = ctx.record;
        result
    }
}
