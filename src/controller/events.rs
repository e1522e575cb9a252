//! # Events
//!
//! Publishes Kubernetes events for lifecycle transitions.

use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Severity of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// One event about a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

impl LifecycleEvent {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Destination of lifecycle events. Publishing is best effort.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, reference: &ObjectReference, event: LifecycleEvent);
}

/// Event sink backed by the events API
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: format!("{FIELD_MANAGER}/{controller}"),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, reference: &ObjectReference, event: LifecycleEvent) {
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        let kube_event = Event {
            type_,
            reason: event.reason.clone(),
            note: Some(event.message),
            action: event.reason,
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&kube_event, reference).await {
            warn!(
                object = reference.name.as_deref().unwrap_or("unknown"),
                error = %e,
                "failed to publish event"
            );
        }
    }
}
