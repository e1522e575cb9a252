use super::{connection_secret_matches, record_provisioned, ConnectedBucket};
use crate::controller::conditions;
use crate::controller::managed::{ManagedResource, Observation};
use crate::controller::store::is_not_found;
use crate::crd::Bucket;
use anyhow::{bail, Result};
use tracing::debug;

pub(super) async fn observe(client: &ConnectedBucket, record: &mut Bucket) -> Result<Observation<()>> {
    prevent_rename(record)?;
    prevent_region_change(record)?;

    let bucket_name = record.bucket_name();
    if !client.storage.bucket_exists(&bucket_name).await? {
        debug!(bucket = %bucket_name, "bucket does not exist");
        return Ok(Observation::Absent);
    }

    record_provisioned(record, &client.endpoint);
    conditions::set_condition(record.conditions_mut(), conditions::ready());

    let up_to_date = connection_secret_in_sync(client, record).await?;
    Ok(Observation::Exists {
        up_to_date,
        observed: (),
    })
}

fn prevent_rename(record: &Bucket) -> Result<()> {
    let Some(previous) = record.observed_bucket_name() else {
        return Ok(());
    };
    if previous != record.bucket_name() {
        bail!(
            "a bucket named {previous:?} has been previously created, you cannot rename it. \
             Either revert 'spec.bucketName' back to {previous:?} or delete the bucket and recreate using a new name"
        );
    }
    Ok(())
}

fn prevent_region_change(record: &Bucket) -> Result<()> {
    let (Some(name), Some(previous)) = (record.observed_bucket_name(), record.observed_region()) else {
        return Ok(());
    };
    let desired = &record.spec.region;
    if previous != desired {
        bail!(
            "a bucket named {name:?} has been previously created in region {previous:?}, \
             you cannot change the region to {desired:?}. \
             Either revert 'spec.region' back to {previous:?} or delete the bucket and recreate it in the new region"
        );
    }
    Ok(())
}

/// A missing or drifted connection secret makes the bucket stale
async fn connection_secret_in_sync(client: &ConnectedBucket, record: &Bucket) -> Result<bool> {
    let Some(secret_ref) = record.spec.write_connection_secret_to_ref.as_ref() else {
        return Ok(true);
    };
    match client.secrets.get(&secret_ref.namespace, &secret_ref.name).await {
        Ok(secret) => Ok(connection_secret_matches(&secret, record, &client.credentials)),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err) => Err(err),
    }
}
