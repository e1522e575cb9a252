//! # Managed Reconciler
//!
//! Drives one managed record through its lifecycle.
//!
//! ```text
//! Connecting -> Observing -> Creating ----------------> (requeue shortly)
//!                         -> Updating -> Ready -------> (requeue after poll interval)
//!                         -> Ready
//! Deleting -> Finalized
//! ```
//!
//! The external side of each record kind is plugged in through [`Connector`] and
//! [`ExternalClient`]. Create, update and delete report their own failures through
//! [`ErrorHandler`]; connect and observe failures are reported here.

use crate::constants::{BUCKET_FINALIZER, USER_FINALIZER};
use crate::controller::conditions::{self, Reason, TYPE_FAILED};
use crate::controller::events::{EventSink, LifecycleEvent};
use crate::controller::pipeline::{ResultHandler, StepResult};
use crate::controller::store::RecordStore;
use crate::crd::{Bucket, Condition, StorageUser};
use crate::observability::metrics;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, Instrument};

/// The record kinds managed by this controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Bucket,
    StorageUser,
}

impl RecordKind {
    #[must_use]
    pub fn finalizer(self) -> &'static str {
        match self {
            RecordKind::Bucket => BUCKET_FINALIZER,
            RecordKind::StorageUser => USER_FINALIZER,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Bucket => "bucket",
            RecordKind::StorageUser => "storageuser",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities shared by every managed record
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: RecordKind;

    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == Self::KIND.finalizer())
    }

    /// Returns `true` if the finalizer was added
    fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers_mut().push(Self::KIND.finalizer().to_string());
        true
    }

    /// Returns `true` if the finalizer was removed
    fn remove_finalizer(&mut self) -> bool {
        let before = self.finalizers().len();
        self.finalizers_mut().retain(|f| f != Self::KIND.finalizer());
        before != self.finalizers().len()
    }

    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl ManagedResource for Bucket {
    const KIND: RecordKind = RecordKind::Bucket;

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}

impl ManagedResource for StorageUser {
    const KIND: RecordKind = RecordKind::StorageUser;

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}

/// What Observe found on the external side
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    Absent,
    Exists { up_to_date: bool, observed: T },
}

/// Builds a client for the external API of one record
#[async_trait]
pub trait Connector<K: ManagedResource>: Send + Sync {
    type Client: ExternalClient<K>;

    async fn connect(&self, record: &K) -> anyhow::Result<Self::Client>;
}

/// Lifecycle operations against the external API
#[async_trait]
pub trait ExternalClient<K: ManagedResource>: Send + Sync {
    /// Whatever Observe learned that Update needs
    type Observed: Send;

    async fn observe(&self, record: &mut K) -> anyhow::Result<Observation<Self::Observed>>;

    async fn create(&self, record: &mut K) -> anyhow::Result<()>;

    async fn update(&self, record: &mut K, observed: Self::Observed) -> anyhow::Result<()>;

    async fn delete(&self, record: &mut K) -> anyhow::Result<()>;
}

/// Which branch failed, selects the condition reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ProvisioningFailed,
    DeletionFailed,
}

impl FailureReason {
    fn reason(self) -> Reason {
        match self {
            FailureReason::ProvisioningFailed => Reason::ProvisioningFailed,
            FailureReason::DeletionFailed => Reason::DeletionFailed,
        }
    }

    fn ready_condition(self) -> Condition {
        match self {
            FailureReason::ProvisioningFailed => conditions::not_ready(),
            FailureReason::DeletionFailed => conditions::deleting(),
        }
    }
}

/// Record a failure on the record: conditions, status write and a warning event.
///
/// A failing status write is logged and does not replace `err`.
pub async fn report_failure<K: ManagedResource>(
    record: &mut K,
    records: &dyn RecordStore<K>,
    events: &dyn EventSink,
    reason: FailureReason,
    err: anyhow::Error,
) -> anyhow::Error {
    let message = format!("{err:#}");
    let conds = record.conditions_mut();
    conditions::set_condition(conds, reason.ready_condition());
    conditions::set_condition(conds, conditions::failed(reason.reason(), message.clone()));
    conditions::set_condition(conds, conditions::reconcile_error());

    if let Err(update_err) = records.update_status(record).await {
        debug!(
            record = %record.name_any(),
            error = %format!("{update_err:#}"),
            "updating status failed"
        );
    }
    events
        .publish(&record.object_ref(&()), LifecycleEvent::warning("Failed", message))
        .await;
    err
}

/// Gives the shared [`ErrorHandler`] access to a lifecycle context
pub trait ReconcileContext: Send {
    type Record: ManagedResource;

    fn record(&mut self) -> &mut Self::Record;

    fn records(&self) -> Arc<dyn RecordStore<Self::Record>>;

    fn events(&self) -> Arc<dyn EventSink>;
}

/// Terminal handler of every lifecycle pipeline
#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    pub reason: FailureReason,
    /// Prefix of the reported error, e.g. "cannot provision bucket"
    pub operation: &'static str,
}

impl ErrorHandler {
    #[must_use]
    pub fn provisioning(operation: &'static str) -> Self {
        Self {
            reason: FailureReason::ProvisioningFailed,
            operation,
        }
    }

    #[must_use]
    pub fn deletion(operation: &'static str) -> Self {
        Self {
            reason: FailureReason::DeletionFailed,
            operation,
        }
    }
}

#[async_trait]
impl<C: ReconcileContext> ResultHandler<C> for ErrorHandler {
    async fn handle(&self, ctx: &mut C, result: StepResult) -> StepResult {
        let Err(err) = result else {
            return Ok(());
        };
        let records = ctx.records();
        let events = ctx.events();
        let err = err.context(self.operation);
        Err(report_failure(ctx.record(), records.as_ref(), events.as_ref(), self.reason, err).await)
    }
}

/// Errors returned to the controller runtime
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),

    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

/// States of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Observing,
    Creating,
    Updating,
    Ready,
    Deleting,
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Connecting => "Connecting",
            Phase::Observing => "Observing",
            Phase::Creating => "Creating",
            Phase::Updating => "Updating",
            Phase::Ready => "Ready",
            Phase::Deleting => "Deleting",
            Phase::Finalized => "Finalized",
        };
        f.write_str(s)
    }
}

/// Phase together with what the next transition needs
enum State<Cl, O> {
    Connecting,
    Observing(Cl),
    Creating(Cl),
    Updating(Cl, O),
    Ready,
    Deleting,
    Finalized,
}

impl<Cl, O> State<Cl, O> {
    fn phase(&self) -> Phase {
        match self {
            State::Connecting => Phase::Connecting,
            State::Observing(_) => Phase::Observing,
            State::Creating(_) => Phase::Creating,
            State::Updating(..) => Phase::Updating,
            State::Ready => Phase::Ready,
            State::Deleting => Phase::Deleting,
            State::Finalized => Phase::Finalized,
        }
    }
}

/// Timing of a [`ManagedReconciler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Requeue interval once the record is ready
    pub poll_interval: Duration,
    /// Requeue interval right after a create
    pub create_requeue: Duration,
    /// Upper bound for one reconciliation
    pub timeout: Duration,
}

/// Generic reconciler for one record kind
pub struct ManagedReconciler<K, C> {
    connector: C,
    records: Arc<dyn RecordStore<K>>,
    events: Arc<dyn EventSink>,
    settings: ReconcileSettings,
}

impl<K, C> fmt::Debug for ManagedReconciler<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedReconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<K, C> ManagedReconciler<K, C>
where
    K: ManagedResource,
    C: Connector<K>,
{
    pub fn new(
        connector: C,
        records: Arc<dyn RecordStore<K>>,
        events: Arc<dyn EventSink>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            connector,
            records,
            events,
            settings,
        }
    }

    /// Reconcile one record, bounded by the configured timeout
    pub async fn reconcile(&self, record: &K) -> Result<Action, ReconcilerError> {
        let kind = K::KIND.as_str();
        let span = tracing::info_span!(
            "reconcile",
            kind = kind,
            name = %record.name_any(),
        );
        let start = Instant::now();
        metrics::increment_reconciliations(kind);

        let mut record = record.clone();
        let drive = self.drive(&mut record).instrument(span);
        let result = match tokio::time::timeout(self.settings.timeout, drive).await {
            Ok(result) => result.map_err(ReconcilerError::from),
            Err(_) => Err(ReconcilerError::Timeout(self.settings.timeout)),
        };

        metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::increment_reconciliation_errors(kind);
        }
        result
    }

    async fn drive(&self, record: &mut K) -> anyhow::Result<Action> {
        let mut state: State<C::Client, <C::Client as ExternalClient<K>>::Observed> =
            if record.is_deleting() {
                State::Deleting
            } else {
                State::Connecting
            };

        loop {
            debug!(phase = %state.phase(), "entering phase");
            state = match state {
                State::Connecting => {
                    if record.add_finalizer() {
                        self.records.update_metadata(record).await?;
                    }
                    let client = self
                        .connect(record, FailureReason::ProvisioningFailed)
                        .await?;
                    State::Observing(client)
                }
                State::Observing(client) => match client.observe(record).await {
                    Ok(Observation::Absent) => State::Creating(client),
                    Ok(Observation::Exists {
                        up_to_date: false,
                        observed,
                    }) => State::Updating(client, observed),
                    Ok(Observation::Exists {
                        up_to_date: true, ..
                    }) => State::Ready,
                    Err(err) => {
                        let err = err.context("cannot observe external resource");
                        return Err(self
                            .fail(record, FailureReason::ProvisioningFailed, err)
                            .await);
                    }
                },
                State::Creating(client) => {
                    client.create(record).await?;
                    let conds = record.conditions_mut();
                    conditions::set_condition(conds, conditions::reconcile_success());
                    conditions::remove_condition(conds, TYPE_FAILED);
                    self.records.update_metadata(record).await?;
                    self.records.update_status(record).await?;
                    info!(record = %record.name_any(), "external resource created");
                    metrics::increment_requeues_total("created");
                    return Ok(Action::requeue(self.settings.create_requeue));
                }
                State::Updating(client, observed) => {
                    client.update(record, observed).await?;
                    State::Ready
                }
                State::Ready => {
                    let conds = record.conditions_mut();
                    conditions::set_condition(conds, conditions::reconcile_success());
                    conditions::remove_condition(conds, TYPE_FAILED);
                    self.records.update_status(record).await?;
                    metrics::increment_requeues_total("poll");
                    return Ok(Action::requeue(self.settings.poll_interval));
                }
                State::Deleting => {
                    if !record.has_finalizer() {
                        State::Finalized
                    } else {
                        let client = self.connect(record, FailureReason::DeletionFailed).await?;
                        conditions::set_condition(record.conditions_mut(), conditions::deleting());
                        client.delete(record).await?;

                        let conds = record.conditions_mut();
                        conditions::set_condition(conds, conditions::reconcile_success());
                        conditions::remove_condition(conds, TYPE_FAILED);
                        self.records.update_status(record).await?;
                        record.remove_finalizer();
                        self.records.update_metadata(record).await?;
                        info!(record = %record.name_any(), "external resource deleted");
                        State::Finalized
                    }
                }
                State::Finalized => return Ok(Action::await_change()),
            };
        }
    }

    async fn connect(&self, record: &mut K, reason: FailureReason) -> anyhow::Result<C::Client> {
        match self.connector.connect(record).await {
            Ok(client) => Ok(client),
            Err(err) => {
                let err = err.context("cannot connect to external API");
                Err(self.fail(record, reason, err).await)
            }
        }
    }

    async fn fail(&self, record: &mut K, reason: FailureReason, err: anyhow::Error) -> anyhow::Error {
        report_failure(record, self.records.as_ref(), self.events.as_ref(), reason, err).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BucketSpec, SecretReference, StorageUserSpec};

    fn bucket() -> Bucket {
        Bucket::new(
            "assets",
            BucketSpec {
                credentials_secret_ref: SecretReference::new("default", "creds"),
                endpoint_url: "objects.example.com".to_string(),
                bucket_name: None,
                region: "rma".to_string(),
                bucket_deletion_policy: crate::crd::BucketDeletionPolicy::DeleteIfEmpty,
                write_connection_secret_to_ref: None,
            },
        )
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut b = bucket();
        assert!(!b.has_finalizer());
        assert!(b.add_finalizer());
        assert!(!b.add_finalizer());
        assert_eq!(b.finalizers(), &[BUCKET_FINALIZER.to_string()]);
        assert!(b.remove_finalizer());
        assert!(!b.remove_finalizer());
        assert!(b.finalizers().is_empty());
    }

    #[test]
    fn test_each_kind_has_its_own_finalizer() {
        let mut user = StorageUser::new("alice", StorageUserSpec::default());
        user.add_finalizer();
        assert_eq!(user.finalizers(), &[USER_FINALIZER.to_string()]);
        assert_ne!(RecordKind::Bucket.finalizer(), RecordKind::StorageUser.finalizer());
    }

    #[test]
    fn test_conditions_mut_creates_status() {
        let mut b = bucket();
        assert!(b.conditions().is_empty());
        conditions::set_condition(b.conditions_mut(), conditions::ready());
        assert_eq!(b.conditions().len(), 1);
        assert!(b.status.is_some());
    }
}
