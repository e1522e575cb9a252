use super::BucketContext;
use crate::constants::{MAX_KEYS_PER_BULK_DELETE, OBJECT_LISTING_BUFFER};
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, Pipeline, Step, StepResult};
use crate::crd::BucketDeletionPolicy;
use crate::observability::metrics;
use crate::provider::{ListedObject, ObjectStorage};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub(super) fn pipeline() -> Pipeline<BucketContext> {
    let deprovision = Pipeline::new().with_steps(vec![
        Step::when(has_delete_all_policy, "delete all objects", delete_all_objects),
        Step::new("delete bucket", delete_bucket),
        Step::new("emit event", emit_deletion_event),
    ]);

    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::when(has_observed_bucket, "check bucket", check_bucket),
            Step::if_then(has_live_bucket, Step::nested("deprovision bucket", deprovision)),
        ])
        .with_finalizer(Box::new(ErrorHandler::deletion("cannot deprovision bucket")))
}

/// Buckets that never made it into status were never provisioned
fn has_observed_bucket(ctx: &BucketContext) -> bool {
    ctx.record.observed_bucket_name().is_some()
}

/// A bucket removed out of band or by an earlier pass needs no deprovisioning
fn has_live_bucket(ctx: &BucketContext) -> bool {
    has_observed_bucket(ctx) && ctx.bucket_present
}

fn has_delete_all_policy(ctx: &BucketContext) -> bool {
    ctx.record.spec.bucket_deletion_policy == BucketDeletionPolicy::DeleteAll
}

fn observed_bucket(ctx: &BucketContext) -> String {
    ctx.record.observed_bucket_name().unwrap_or_default().to_string()
}

fn delete_all_objects(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let bucket = observed_bucket(ctx);
        let storage = ctx.storage.as_ref();
        let (tx, rx) = mpsc::channel(OBJECT_LISTING_BUFFER);

        let (listed, removed) = tokio::join!(
            storage.list_objects(&bucket, tx),
            remove_listed_objects(storage, &bucket, rx),
        );
        let removed = removed?;
        listed?;
        info!(bucket = %bucket, objects = removed, "removed all objects");
        Ok(())
    })
}

/// Drain `rx` into bulk deletes. Stops at the first object that cannot be removed.
async fn remove_listed_objects(
    storage: &dyn ObjectStorage,
    bucket: &str,
    mut rx: mpsc::Receiver<ListedObject>,
) -> Result<u64> {
    let mut batch = Vec::with_capacity(MAX_KEYS_PER_BULK_DELETE);
    let mut removed = 0;

    while let Some(object) = rx.recv().await {
        if let Some(err) = object.error {
            debug!(key = %object.key, error = %err, "cannot list object");
            continue;
        }
        batch.push(object.key);
        if batch.len() >= MAX_KEYS_PER_BULK_DELETE {
            removed += flush(storage, bucket, &mut batch).await?;
        }
    }
    if !batch.is_empty() {
        removed += flush(storage, bucket, &mut batch).await?;
    }
    Ok(removed)
}

async fn flush(storage: &dyn ObjectStorage, bucket: &str, batch: &mut Vec<String>) -> Result<u64> {
    let keys = std::mem::take(batch);
    let count = keys.len() as u64;
    let failures = storage.delete_objects(bucket, keys, true).await?;
    if let Some(failure) = failures.into_iter().next() {
        bail!("object {:?} cannot be removed: {}", failure.key, failure.message);
    }
    metrics::add_deleted_objects(count);
    Ok(count)
}

fn check_bucket(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let bucket = observed_bucket(ctx);
        ctx.bucket_present = ctx.storage.bucket_exists(&bucket).await?;
        if !ctx.bucket_present {
            info!(bucket = %bucket, "bucket is already gone");
        }
        Ok(())
    })
}

/// Fails while the bucket still has objects
fn delete_bucket(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let bucket = observed_bucket(ctx);
        ctx.storage.delete_bucket(&bucket).await
    })
}

fn emit_deletion_event(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal("Deleted", "Bucket deleted"))
            .await;
        Ok(())
    })
}
