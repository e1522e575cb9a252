//! # ProviderConfig Usage Accounting
//!
//! Counts the `ProviderConfigUsage` records pointing at each `ProviderConfig` and
//! blocks deletion of a config while any usage remains.

use crate::constants::PROVIDER_CONFIG_FINALIZER;
use crate::controller::conditions;
use crate::controller::events::{EventSink, LifecycleEvent};
use crate::controller::managed::ReconcilerError;
use crate::controller::store::{ProviderConfigStore, RecordStore};
use crate::crd::{ProviderConfig, ProviderConfigStatus};
use crate::observability::metrics;
use anyhow::Result;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};

/// Reconciles `ProviderConfig` records
pub struct ProviderConfigReconciler {
    configs: Arc<dyn ProviderConfigStore>,
    records: Arc<dyn RecordStore<ProviderConfig>>,
    events: Arc<dyn EventSink>,
    in_use_requeue: Duration,
}

impl std::fmt::Debug for ProviderConfigReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfigReconciler")
            .field("in_use_requeue", &self.in_use_requeue)
            .finish_non_exhaustive()
    }
}

impl ProviderConfigReconciler {
    pub fn new(
        configs: Arc<dyn ProviderConfigStore>,
        records: Arc<dyn RecordStore<ProviderConfig>>,
        events: Arc<dyn EventSink>,
        in_use_requeue: Duration,
    ) -> Self {
        Self {
            configs,
            records,
            events,
            in_use_requeue,
        }
    }

    pub async fn reconcile(&self, config: &ProviderConfig) -> Result<Action, ReconcilerError> {
        let span = info_span!("reconcile", kind = "providerconfig", name = %config.name_any());
        let mut config = config.clone();
        metrics::increment_reconciliations("providerconfig");
        let result = self.drive(&mut config).instrument(span).await;
        if result.is_err() {
            metrics::increment_reconciliation_errors("providerconfig");
        }
        result.map_err(ReconcilerError::from)
    }

    async fn drive(&self, config: &mut ProviderConfig) -> Result<Action> {
        let name = config.name_any();
        let usages = self.configs.list_usages(&name).await?;
        let users = i64::try_from(usages.len()).unwrap_or(i64::MAX);
        metrics::set_provider_config_users(&name, users);

        let status = config.status.get_or_insert_with(ProviderConfigStatus::default);
        if status.users != users || status.conditions.is_empty() {
            status.users = users;
            conditions::set_condition(&mut status.conditions, conditions::ready());
            self.records.update_status(config).await?;
            debug!(users = users, "updated usage count");
        }

        if config.meta().deletion_timestamp.is_none() {
            if !has_finalizer(config) {
                config
                    .finalizers_mut()
                    .push(PROVIDER_CONFIG_FINALIZER.to_string());
                self.records.update_metadata(config).await?;
            }
            return Ok(Action::await_change());
        }

        if users > 0 {
            let message = format!("ProviderConfig is still used by {users} resource(s)");
            self.events
                .publish(
                    &config.object_ref(&()),
                    LifecycleEvent::warning("CannotDelete", message),
                )
                .await;
            metrics::increment_requeues_total("in-use");
            return Ok(Action::requeue(self.in_use_requeue));
        }

        if has_finalizer(config) {
            config
                .finalizers_mut()
                .retain(|f| f != PROVIDER_CONFIG_FINALIZER);
            self.records.update_metadata(config).await?;
            info!("ProviderConfig no longer in use, released");
        }
        Ok(Action::await_change())
    }
}

fn has_finalizer(config: &ProviderConfig) -> bool {
    config
        .finalizers()
        .iter()
        .any(|f| f == PROVIDER_CONFIG_FINALIZER)
}
