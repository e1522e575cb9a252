use super::{release_secret, user_id, UserContext};
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, ignore_not_found, Pipeline, Step, StepResult};
use crate::controller::store::is_not_found;
use futures::future::BoxFuture;
use tracing::debug;

pub(super) fn pipeline() -> Pipeline<UserContext> {
    let release = Pipeline::new()
        .with_steps(vec![Step::new(
            "remove secret finalizer",
            remove_secret_finalizer,
        )])
        .with_error_handler(ignore_not_found);

    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::new("delete objects user", delete_objects_user),
            Step::if_then(
                has_written_secret,
                Step::nested("release credentials secret", release),
            ),
            Step::new("emit event", emit_deletion_event),
        ])
        .with_finalizer(Box::new(ErrorHandler::deletion(
            "cannot deprovision objects user",
        )))
}

fn has_written_secret(ctx: &UserContext) -> bool {
    ctx.record.written_secret_ref().is_some()
}

fn delete_objects_user(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let Some(id) = user_id(&ctx.record) else {
            debug!("objects user was never created");
            return Ok(());
        };
        match ctx.api.delete_objects_user(&id).await {
            Ok(()) => debug!(user.id = %id, "deleted objects user"),
            Err(err) if is_not_found(&err) => debug!(user.id = %id, "objects user already gone"),
            Err(err) => return Err(err),
        }
        Ok(())
    })
}

/// The secret itself goes away with its owner
fn remove_secret_finalizer(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let Some(secret_ref) = ctx.record.written_secret_ref().cloned() else {
            return Ok(());
        };
        release_secret(ctx.secrets.as_ref(), &secret_ref).await
    })
}

fn emit_deletion_event(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal("Deleted", "ObjectsUser deleted"))
            .await;
        Ok(())
    })
}
