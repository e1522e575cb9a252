//! # S3 Object Storage
//!
//! `ObjectStorage` on top of the AWS SDK, pointed at an S3-compatible endpoint
//! with path-style addressing and static credentials.

use crate::observability::metrics;
use crate::provider::{
    ListedObject, ObjectRemovalError, ObjectStorage, S3Credentials, S3Endpoint, StorageConnector,
    StorageError,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};

const PROVIDER: &str = "s3";

/// Object storage client for one endpoint and key pair
pub struct S3ObjectStorage {
    client: Client,
    endpoint: String,
}

impl std::fmt::Debug for S3ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStorage")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStorage {
    /// Load the SDK config for `endpoint` with static credentials.
    /// An empty region falls back to `us-east-1`.
    pub async fn connect(endpoint: &S3Endpoint, region: &str, credentials: &S3Credentials) -> Self {
        let static_credentials = Credentials::from_keys(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
        );
        let region = if region.is_empty() { "us-east-1" } else { region };
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint.url())
            .credentials_provider(static_credentials)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            endpoint: endpoint.url(),
        }
    }
}

/// Map an SDK error to a [`StorageError`]
fn classify<E, R>(bucket: &str, err: &SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some("BucketAlreadyExists") => StorageError::OwnedByOther {
            bucket: bucket.to_string(),
        },
        Some("IllegalLocationConstraintException" | "InvalidLocationConstraint") => {
            StorageError::WrongRegion {
                bucket: bucket.to_string(),
            }
        }
        Some(code) => StorageError::Rejected {
            code: code.to_string(),
            message: err.message().unwrap_or(code).to_string(),
        },
        None => StorageError::Sdk(DisplayErrorContext(err).to_string()),
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        metrics::increment_external_operations(PROVIDER, "head_bucket");
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    return Ok(false);
                }
                metrics::increment_external_operation_errors(PROVIDER, "head_bucket");
                Err(classify(bucket, &err)).context(format!("cannot check whether bucket {bucket:?} exists"))
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let span = info_span!("s3.bucket.create", bucket.name = bucket, region = region);
        async move {
            metrics::increment_external_operations(PROVIDER, "create_bucket");
            let mut request = self.client.create_bucket().bucket(bucket);
            if !region.is_empty() {
                request = request.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(region))
                        .build(),
                );
            }
            request.send().await.map_err(|err| {
                metrics::increment_external_operation_errors(PROVIDER, "create_bucket");
                classify(bucket, &err)
            })?;
            info!("created bucket {}", bucket);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let span = info_span!("s3.bucket.delete", bucket.name = bucket);
        async move {
            metrics::increment_external_operations(PROVIDER, "delete_bucket");
            self.client
                .delete_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|err| {
                    metrics::increment_external_operation_errors(PROVIDER, "delete_bucket");
                    classify(bucket, &err)
                })?;
            info!("deleted bucket {}", bucket);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn list_objects(&self, bucket: &str, tx: mpsc::Sender<ListedObject>) -> Result<()> {
        metrics::increment_external_operations(PROVIDER, "list_objects");
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            match page {
                Ok(output) => {
                    for object in output.contents() {
                        let Some(key) = object.key() else { continue };
                        if tx.send(ListedObject::new(key)).await.is_err() {
                            debug!("object listing receiver dropped, stopping");
                            return Ok(());
                        }
                    }
                }
                Err(err) => {
                    metrics::increment_external_operation_errors(PROVIDER, "list_objects");
                    let entry = ListedObject {
                        key: String::new(),
                        error: Some(DisplayErrorContext(&err).to_string()),
                    };
                    // A failed page ends the listing.
                    let _ = tx.send(entry).await;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
        bypass_governance: bool,
    ) -> Result<Vec<ObjectRemovalError>> {
        metrics::increment_external_operations(PROVIDER, "delete_objects");
        let count = keys.len();
        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .context("cannot build object identifiers")?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("cannot build delete request")?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .bypass_governance_retention(bypass_governance)
            .send()
            .await
            .map_err(|err| {
                metrics::increment_external_operation_errors(PROVIDER, "delete_objects");
                classify(bucket, &err)
            })?;

        let failures: Vec<ObjectRemovalError> = output
            .errors()
            .iter()
            .map(|e| ObjectRemovalError {
                key: e.key().unwrap_or_default().to_string(),
                message: e
                    .message()
                    .or_else(|| e.code())
                    .unwrap_or("unknown error")
                    .to_string(),
            })
            .collect();
        debug!(
            bucket = bucket,
            requested = count,
            failed = failures.len(),
            "bulk delete finished"
        );
        Ok(failures)
    }
}

/// Builds [`S3ObjectStorage`] clients
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl StorageConnector for S3Connector {
    async fn connect(
        &self,
        endpoint: &S3Endpoint,
        region: &str,
        credentials: &S3Credentials,
    ) -> Result<Arc<dyn ObjectStorage>> {
        debug!(endpoint = %endpoint.url(), "creating S3 client");
        Ok(Arc::new(
            S3ObjectStorage::connect(endpoint, region, credentials).await,
        ))
    }
}
