//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `objectstore_provisioner_reconciliations_total` - Reconciliations by record kind
//! - `objectstore_provisioner_reconciliation_errors_total` - Failed reconciliations by record kind
//! - `objectstore_provisioner_reconciliation_duration_seconds` - Duration of reconciliations by record kind
//! - `objectstore_provisioner_requeues_total` - Requeues by reason
//! - `objectstore_provisioner_external_operations_total` - Calls to the object storage and account APIs
//! - `objectstore_provisioner_external_operation_errors_total` - Failed external calls
//! - `objectstore_provisioner_deleted_objects_total` - Objects removed while emptying buckets
//! - `objectstore_provisioner_provider_config_users` - Usages per `ProviderConfig`

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_reconciliations_total",
            "Total number of reconciliations by record kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_reconciliation_errors_total",
            "Total number of reconciliation errors by record kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "objectstore_provisioner_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds by record kind",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static EXTERNAL_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_external_operations_total",
            "Total number of external API operations by system and operation",
        ),
        &["system", "operation"],
    )
    .expect("Failed to create EXTERNAL_OPERATIONS_TOTAL metric - this should never happen")
});

static EXTERNAL_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_external_operation_errors_total",
            "Total number of failed external API operations by system and operation",
        ),
        &["system", "operation"],
    )
    .expect("Failed to create EXTERNAL_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static DELETED_OBJECTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "objectstore_provisioner_deleted_objects_total",
        "Total number of objects removed while emptying buckets",
    )
    .expect("Failed to create DELETED_OBJECTS_TOTAL metric - this should never happen")
});

static PROVIDER_CONFIG_USERS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "objectstore_provisioner_provider_config_users",
            "Number of usages referencing each ProviderConfig",
        ),
        &["provider_config"],
    )
    .expect("Failed to create PROVIDER_CONFIG_USERS metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only if a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXTERNAL_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXTERNAL_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELETED_OBJECTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_CONFIG_USERS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

/// Reasons: `created`, `poll`, `error`, `in-use`
pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_external_operations(system: &str, operation: &str) {
    EXTERNAL_OPERATIONS_TOTAL
        .with_label_values(&[system, operation])
        .inc();
}

pub fn increment_external_operation_errors(system: &str, operation: &str) {
    EXTERNAL_OPERATION_ERRORS_TOTAL
        .with_label_values(&[system, operation])
        .inc();
}

pub fn add_deleted_objects(count: u64) {
    DELETED_OBJECTS_TOTAL.inc_by(count);
}

pub fn set_provider_config_users(provider_config: &str, count: i64) {
    PROVIDER_CONFIG_USERS
        .with_label_values(&[provider_config])
        .set(count);
}
