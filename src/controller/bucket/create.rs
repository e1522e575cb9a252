use super::{record_provisioned, BucketContext};
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, Pipeline, Step, StepResult};
use futures::future::BoxFuture;
use tracing::{debug, info};

pub(super) fn pipeline() -> Pipeline<BucketContext> {
    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::new("create bucket", create_bucket),
            Step::when(
                wants_connection_secret,
                "ensure connection secret",
                ensure_connection_secret,
            ),
            Step::new("emit event", emit_creation_event),
        ])
        .with_finalizer(Box::new(ErrorHandler::provisioning("cannot provision bucket")))
}

pub(super) fn wants_connection_secret(ctx: &BucketContext) -> bool {
    ctx.record.spec.write_connection_secret_to_ref.is_some()
}

/// Creates the bucket. A bucket we can already access counts as created.
fn create_bucket(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let bucket_name = ctx.record.bucket_name();
        let region = ctx.record.spec.region.clone();

        if let Err(err) = ctx.storage.create_bucket(&bucket_name, &region).await {
            match ctx.storage.bucket_exists(&bucket_name).await {
                Ok(true) => debug!(bucket = %bucket_name, "bucket exists already"),
                _ => return Err(err),
            }
        }

        record_provisioned(&mut ctx.record, &ctx.endpoint);
        info!(bucket = %bucket_name, region = %region, "bucket provisioned");
        Ok(())
    })
}

pub(super) fn ensure_connection_secret(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(ctx.ensure_connection_secret())
}

fn emit_creation_event(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal("Created", "Bucket successfully created"))
            .await;
        Ok(())
    })
}
