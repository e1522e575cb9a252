//! # Conditions
//!
//! Builders and list operations for status conditions.
//!
//! Three condition types are used:
//! - `Ready`: whether the external resource is usable
//! - `Failed`: the last error, present only after a failed reconciliation
//! - `Synced`: whether the last reconciliation completed

use crate::crd::Condition;
use std::fmt;

pub const TYPE_READY: &str = "Ready";
pub const TYPE_FAILED: &str = "Failed";
pub const TYPE_SYNCED: &str = "Synced";

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";

/// Machine-readable condition reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Available,
    Deleting,
    ProvisioningFailed,
    DeletionFailed,
    ReconcileSuccess,
    ReconcileError,
}

impl Reason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Available => "Available",
            Reason::Deleting => "Deleting",
            Reason::ProvisioningFailed => "ProvisioningFailed",
            Reason::DeletionFailed => "DeletionFailed",
            Reason::ReconcileSuccess => "ReconcileSuccess",
            Reason::ReconcileError => "ReconcileError",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn condition(type_: &str, status: bool, reason: Reason, message: Option<String>) -> Condition {
    Condition {
        r#type: type_.to_string(),
        status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        reason: Some(reason.as_str().to_string()),
        message,
    }
}

/// `Ready=True`, reason `Available`
#[must_use]
pub fn ready() -> Condition {
    condition(TYPE_READY, true, Reason::Available, None)
}

/// `Ready=False`, reason `Available`
#[must_use]
pub fn not_ready() -> Condition {
    condition(TYPE_READY, false, Reason::Available, None)
}

/// `Ready=False`, reason `Deleting`
#[must_use]
pub fn deleting() -> Condition {
    condition(TYPE_READY, false, Reason::Deleting, None)
}

/// `Failed=True` with the given reason and error message
#[must_use]
pub fn failed(reason: Reason, message: impl Into<String>) -> Condition {
    condition(TYPE_FAILED, true, reason, Some(message.into()))
}

/// `Synced=True`, reason `ReconcileSuccess`
#[must_use]
pub fn reconcile_success() -> Condition {
    condition(TYPE_SYNCED, true, Reason::ReconcileSuccess, None)
}

/// `Synced=False`, reason `ReconcileError`
#[must_use]
pub fn reconcile_error() -> Condition {
    condition(TYPE_SYNCED, false, Reason::ReconcileError, None)
}

/// Insert or replace the condition of the same type.
///
/// The transition time of an existing condition is kept when its status is unchanged.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
            }
            existing.reason = new.reason;
            existing.message = new.message;
        }
        None => conditions.push(new),
    }
}

/// Remove the condition of the given type, if present
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.r#type != type_);
}

#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == type_)
}

/// Whether a condition of the given type has the given status and reason
#[must_use]
pub fn has_condition(conditions: &[Condition], type_: &str, status: bool, reason: Reason) -> bool {
    let expected = if status { STATUS_TRUE } else { STATUS_FALSE };
    find_condition(conditions, type_).is_some_and(|c| {
        c.status == expected && c.reason.as_deref() == Some(reason.as_str())
    })
}

/// A previous deletion pass already removed the external resource.
///
/// True when the record carries `Ready=False/Deleting` and `Synced=True/ReconcileSuccess`.
#[must_use]
pub fn is_already_deleted(conditions: &[Condition]) -> bool {
    has_condition(conditions, TYPE_READY, false, Reason::Deleting)
        && has_condition(conditions, TYPE_SYNCED, true, Reason::ReconcileSuccess)
}
