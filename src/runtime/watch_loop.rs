//! # Watch Loop
//!
//! Controller watch loops that monitor the custom resources and trigger
//! reconciliation when changes are detected.

use crate::controller::managed::{Connector, ManagedReconciler, ManagedResource, ReconcilerError};
use crate::controller::provider_config::ProviderConfigReconciler;
use crate::crd::{ProviderConfig, ProviderConfigUsage};
use crate::runtime::error_policy::{
    handle_reconciliation_error, handle_watch_stream_error, record_key, RecordBackoff,
};
use futures::StreamExt;
use kube::api::Api;
use kube::Resource;
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by all reconciliations of one controller
#[derive(Debug)]
pub struct Context<R> {
    pub reconciler: R,
    pub backoff: RecordBackoff,
}

impl<R> Context<R> {
    pub fn new(reconciler: R, backoff: RecordBackoff) -> Self {
        Self {
            reconciler,
            backoff,
        }
    }
}

/// Watch records of kind `K` and drive them through their lifecycle until shutdown
pub async fn run_managed_controller<K, C>(api: Api<K>, context: Arc<Context<ManagedReconciler<K, C>>>)
where
    K: ManagedResource,
    C: Connector<K> + 'static,
{
    let name = K::KIND.as_str();
    info!(controller = name, "Starting controller watch loop...");

    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(
            reconcile_managed::<K, C>,
            |record, error, ctx| handle_reconciliation_error(record.as_ref(), error, &ctx.backoff),
            context,
        )
        .for_each(|result| {
            report(name, result);
            futures::future::ready(())
        })
        .await;

    info!(controller = name, "Controller stopped gracefully");
}

/// Watch `ProviderConfig` records, re-counting a config whenever one of its usages changes
pub async fn run_provider_config_controller(
    configs: Api<ProviderConfig>,
    usages: Api<ProviderConfigUsage>,
    context: Arc<Context<ProviderConfigReconciler>>,
) {
    let name = "providerconfig";
    info!(controller = name, "Starting controller watch loop...");

    Controller::new(configs, watcher::Config::default().any_semantic())
        .watches(usages, watcher::Config::default(), |usage: ProviderConfigUsage| {
            Some(ObjectRef::<ProviderConfig>::new(
                &usage.spec.provider_config_ref.name,
            ))
        })
        .shutdown_on_signal()
        .run(
            reconcile_provider_config,
            |config, error, ctx| handle_reconciliation_error(config.as_ref(), error, &ctx.backoff),
            context,
        )
        .for_each(|result| {
            report(name, result);
            futures::future::ready(())
        })
        .await;

    info!(controller = name, "Controller stopped gracefully");
}

async fn reconcile_managed<K, C>(
    record: Arc<K>,
    ctx: Arc<Context<ManagedReconciler<K, C>>>,
) -> Result<Action, ReconcilerError>
where
    K: ManagedResource,
    C: Connector<K> + 'static,
{
    let result = ctx.reconciler.reconcile(&record).await;
    if result.is_ok() {
        ctx.backoff.reset(&record_key(record.as_ref()));
    }
    result
}

async fn reconcile_provider_config(
    config: Arc<ProviderConfig>,
    ctx: Arc<Context<ProviderConfigReconciler>>,
) -> Result<Action, ReconcilerError> {
    let result = ctx.reconciler.reconcile(&config).await;
    if result.is_ok() {
        ctx.backoff.reset(&record_key(config.as_ref()));
    }
    result
}

type RunResult<K> =
    Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>;

fn report<K>(controller: &str, result: RunResult<K>)
where
    K: Resource,
    K::DynamicType: Debug,
{
    match result {
        Ok((record, action)) => debug!(controller = controller, record = %record, action = ?action, "reconciled"),
        // Already logged and requeued by the error policy.
        Err(controller::Error::ReconcilerFailed(_, record)) => {
            debug!(controller = controller, record = %record, "reconciliation failed");
        }
        Err(e) => {
            handle_watch_stream_error(controller, &format!("{e:?}"));
        }
    }
}
