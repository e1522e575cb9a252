use super::{display_name, ensure_credentials_secret, UserContext};
use crate::constants::USER_ID_ANNOTATION;
use crate::controller::events::LifecycleEvent;
use crate::controller::managed::ErrorHandler;
use crate::controller::pipeline::{debug_logger, Pipeline, Step, StepResult};
use crate::provider::{CloudObjectsUser, ObjectsUserRequest};
use anyhow::bail;
use futures::future::BoxFuture;
use kube::ResourceExt;
use tracing::info;

pub(super) fn pipeline() -> Pipeline<UserContext> {
    Pipeline::new()
        .with_before_hooks(vec![debug_logger()])
        .with_steps(vec![
            Step::new("create objects user", create_objects_user),
            Step::when(
                wants_credentials_secret,
                "ensure credentials secret",
                ensure_secret,
            ),
            Step::new("emit event", emit_creation_event),
        ])
        .with_finalizer(Box::new(ErrorHandler::provisioning("cannot create objects user")))
}

pub(super) fn wants_credentials_secret(ctx: &UserContext) -> bool {
    ctx.record.spec.write_connection_secret_to_ref.is_some()
}

pub(super) fn ensure_secret(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(ensure_credentials_secret(ctx))
}

fn create_objects_user(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let request = ObjectsUserRequest {
            display_name: display_name(&ctx.record),
            tags: ctx.record.spec.tags.clone(),
        };
        let cloud_user = ctx.api.create_objects_user(&request).await?;

        // Persisted right away so a failure further down cannot lead to a second user.
        ctx.record
            .annotations_mut()
            .insert(USER_ID_ANNOTATION.to_string(), cloud_user.id.clone());
        ctx.records.update_metadata(&mut ctx.record).await?;
        info!(user.id = %cloud_user.id, display_name = %cloud_user.display_name, "created objects user");

        check_key_pair(&cloud_user)?;
        ctx.cloud_user = cloud_user;
        Ok(())
    })
}

fn check_key_pair(cloud_user: &CloudObjectsUser) -> StepResult {
    let Some(keys) = cloud_user.keys.first() else {
        bail!("the returned objects user has no key pairs");
    };
    if keys.get("secret_key").is_none_or(String::is_empty) {
        bail!("the returned objects user has no secret_key. Does the API token have enough permissions?");
    }
    Ok(())
}

fn emit_creation_event(ctx: &mut UserContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.emit(LifecycleEvent::normal(
            "Created",
            "ObjectsUser successfully created",
        ))
        .await;
        Ok(())
    })
}
