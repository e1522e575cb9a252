use super::create::{ensure_secret, wants_credentials_secret};
use super::{display_name, is_owned_by, release_secret, UserContext};
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, ignore_not_found, Pipeline, Step, StepResult};
use crate::provider::ObjectsUserRequest;
use anyhow::{bail, Context};
use futures::future::BoxFuture;
use kube::ResourceExt;
use tracing::debug;

pub(super) fn pipeline() -> Pipeline<UserContext> {
    let deprovision = Pipeline::new()
        .with_steps(vec![
            Step::new("check ownership", check_ownership),
            Step::new("delete credentials secret", delete_credentials_secret),
        ])
        .with_error_handler(ignore_not_found);

    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::new("update objects user", update_objects_user),
            Step::if_or_else(
                wants_credentials_secret,
                Step::new("ensure credentials secret", ensure_secret),
                Step::if_then(
                    has_written_secret,
                    Step::nested("deprovision credentials secret", deprovision),
                ),
            ),
            Step::when(
                has_abandoned_secret,
                "forget credentials secret",
                forget_credentials_secret,
            ),
            Step::new("emit event", emit_update_event),
        ])
        .with_finalizer(Box::new(ErrorHandler::provisioning("cannot update objects user")))
}

fn has_written_secret(ctx: &UserContext) -> bool {
    ctx.record.written_secret_ref().is_some()
}

/// A secret was written but is no longer requested
fn has_abandoned_secret(ctx: &UserContext) -> bool {
    !wants_credentials_secret(ctx) && has_written_secret(ctx)
}

fn update_objects_user(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let id = ctx
            .record
            .observed_user_id()
            .map(str::to_string)
            .context("objects user has no ID")?;
        let request = ObjectsUserRequest {
            display_name: display_name(&ctx.record),
            tags: ctx.record.spec.tags.clone(),
        };
        ctx.api.update_objects_user(&id, &request).await?;
        debug!(user.id = %id, display_name = %request.display_name, "updated objects user");
        Ok(())
    })
}

fn check_ownership(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let Some(secret_ref) = ctx.record.written_secret_ref().cloned() else {
            return Ok(());
        };
        let secret = ctx
            .secrets
            .get(&secret_ref.namespace, &secret_ref.name)
            .await?;
        if !is_owned_by(&secret, &ctx.record) {
            bail!("user {} doesn't own secret {secret_ref}", ctx.record.name_any());
        }
        Ok(())
    })
}

fn delete_credentials_secret(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let Some(secret_ref) = ctx.record.written_secret_ref().cloned() else {
            return Ok(());
        };
        // The finalizer would otherwise keep the secret around.
        release_secret(ctx.secrets.as_ref(), &secret_ref).await?;
        ctx.secrets
            .delete(&secret_ref.namespace, &secret_ref.name)
            .await?;
        debug!(secret = %secret_ref, "deleted credentials secret");
        Ok(())
    })
}

fn forget_credentials_secret(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.record.status_mut().connection_secret_ref = None;
        Ok(())
    })
}

fn emit_update_event(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal("Updated", "ObjectsUser updated"))
            .await;
        Ok(())
    })
}
