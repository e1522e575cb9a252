use super::create::{ensure_connection_secret, wants_connection_secret};
use super::BucketContext;
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, Pipeline, Step, StepResult};
use futures::future::BoxFuture;

/// Rewrites the connection secret, e.g. after the user keys were rotated
pub(super) fn pipeline() -> Pipeline<BucketContext> {
    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::when(
                wants_connection_secret,
                "ensure connection secret",
                ensure_connection_secret,
            ),
            Step::new("emit event", emit_update_event),
        ])
        .with_finalizer(Box::new(ErrorHandler::provisioning("cannot update bucket")))
}

fn emit_update_event(ctx: &mut BucketContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal(
            "Updated",
            "Bucket connection secret updated",
        ))
        .await;
        Ok(())
    })
}
