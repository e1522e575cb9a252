use super::{BucketClient, BucketConnector, ConnectedBucket};
use crate::constants::{ACCESS_KEY_ID_NAME, SECRET_ACCESS_KEY_NAME};
use crate::controller::conditions;
use crate::controller::managed::{Connector, ManagedResource};
use crate::crd::{Bucket, SecretReference};
use crate::provider::{S3Credentials, S3Endpoint};
use anyhow::{bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

#[async_trait]
impl Connector<Bucket> for BucketConnector {
    type Client = BucketClient;

    async fn connect(&self, record: &Bucket) -> Result<BucketClient> {
        if conditions::is_already_deleted(record.conditions()) {
            debug!("bucket was deleted in an earlier pass, not connecting");
            return Ok(BucketClient::Disconnected);
        }

        let secret_ref = &record.spec.credentials_secret_ref;
        let secret = self
            .secrets
            .get(&secret_ref.namespace, &secret_ref.name)
            .await?;
        debug!(secret = %secret_ref, "fetched credentials secret");

        let credentials = credentials_from_secret(&secret, secret_ref)?;
        let endpoint = S3Endpoint::parse(&record.spec.endpoint_url)?;
        let storage = self
            .storage
            .connect(&endpoint, &record.spec.region, &credentials)
            .await?;

        Ok(BucketClient::Connected(ConnectedBucket {
            storage,
            credentials,
            endpoint,
            secrets: self.secrets.clone(),
            records: self.records.clone(),
            events: self.events.clone(),
        }))
    }
}

/// Read and validate the S3 key pair of a credentials secret
fn credentials_from_secret(secret: &Secret, secret_ref: &SecretReference) -> Result<S3Credentials> {
    let Some(data) = secret.data.as_ref() else {
        bail!("secret \"{secret_ref}\" does not have any data");
    };
    let value = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .filter(|v| !v.is_empty())
    };
    match (value(ACCESS_KEY_ID_NAME), value(SECRET_ACCESS_KEY_NAME)) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(S3Credentials {
            access_key_id,
            secret_access_key,
        }),
        _ => bail!(
            "secret \"{secret_ref}\" is missing one of the following keys or content: [{ACCESS_KEY_ID_NAME} {SECRET_ACCESS_KEY_NAME}]"
        ),
    }
}
