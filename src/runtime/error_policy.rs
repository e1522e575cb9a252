//! # Error Policy
//!
//! Requeue decisions after failed reconciliations and handling of watch stream errors.

use crate::controller::backoff::FibonacciBackoff;
use crate::controller::managed::ReconcilerError;
use crate::observability::metrics;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Used when the backoff table cannot be locked
const FALLBACK_BACKOFF: Duration = Duration::from_secs(60);

/// Fibonacci backoff tracked per record.
///
/// A record's delay grows with each consecutive failure and starts over after a
/// successful reconciliation, so one failing record never slows down the others.
#[derive(Debug)]
pub struct RecordBackoff {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl RecordBackoff {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for the record identified by `key`
    pub fn next(&self, key: &str) -> Duration {
        match self.states.lock() {
            Ok(mut states) => states
                .entry(key.to_string())
                .or_insert_with(|| FibonacciBackoff::new(self.min_secs, self.max_secs))
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                FALLBACK_BACKOFF
            }
        }
    }

    /// Forget the failures of the record identified by `key`
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}

/// Backoff key of a record, `namespace/name` or just `name` for cluster-scoped records
pub fn record_key<K: Resource>(record: &K) -> String {
    match record.namespace() {
        Some(ns) => format!("{ns}/{}", record.name_any()),
        None => record.name_any(),
    }
}

/// Requeue a failed record after its next backoff delay
pub fn handle_reconciliation_error<K: Resource>(
    record: &K,
    error: &ReconcilerError,
    backoff: &RecordBackoff,
) -> Action {
    let key = record_key(record);
    let delay = backoff.next(&key);

    let next_retry = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    error!(record = %key, error = %error, "reconciliation failed");
    info!(
        record = %key,
        next_retry = %next_retry.to_rfc3339(),
        "retrying in {}s",
        delay.as_secs()
    );

    metrics::increment_requeues_total("error");
    Action::requeue(delay)
}

/// Classes of controller stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Credentials or RBAC were revoked
    Unauthorized,
    /// The watch resource version expired, the watcher relists
    Expired,
    /// The API server is throttling or reinitializing
    Throttled,
    /// A record or the CRD itself is gone
    NotFound,
    Other,
}

/// Classify a controller stream error by its rendered message.
///
/// 404 is checked before 401: a plain-text 404 surfaces as a failed watch that
/// also mentions "Unauthorized" in some client versions.
#[must_use]
pub fn classify_stream_error(message: &str) -> StreamErrorKind {
    let not_found = message.contains("ObjectNotFound")
        || message.contains("404")
        || message.contains("not found");
    if not_found {
        StreamErrorKind::NotFound
    } else if message.contains("401") || message.contains("Unauthorized") {
        StreamErrorKind::Unauthorized
    } else if message.contains("410")
        || message.contains("too old resource version")
        || message.contains("Expired")
        || message.contains("Gone")
    {
        StreamErrorKind::Expired
    } else if message.contains("429")
        || message.contains("TooManyRequests")
        || message.contains("storage is (re)initializing")
    {
        StreamErrorKind::Throttled
    } else {
        StreamErrorKind::Other
    }
}

/// Log a controller stream error and return its class
pub fn handle_watch_stream_error(controller: &str, message: &str) -> StreamErrorKind {
    let kind = classify_stream_error(message);
    match kind {
        StreamErrorKind::Unauthorized => error!(
            controller = controller,
            error = message,
            "watch authentication failed, check the ServiceAccount and its RBAC bindings"
        ),
        StreamErrorKind::Expired => warn!(
            controller = controller,
            "watch resource version expired, relisting"
        ),
        StreamErrorKind::Throttled => warn!(
            controller = controller,
            error = message,
            "API server is throttling watch requests"
        ),
        StreamErrorKind::NotFound => warn!(
            controller = controller,
            error = message,
            "object not found, it was deleted or its CRD is missing"
        ),
        StreamErrorKind::Other => error!(
            controller = controller,
            error = message,
            "controller stream error"
        ),
    }
    kind
}
