//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_ACCOUNT_API_URL, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS,
    DEFAULT_BUCKET_POLL_INTERVAL_SECS, DEFAULT_CREATE_REQUEUE_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_RECONCILE_TIMEOUT_SECS, DEFAULT_USER_POLL_INTERVAL_SECS, DEFAULT_WEBHOOK_PORT,
};
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Port of the metrics and health probe server
    pub metrics_port: u16,
    /// Smallest delay before retrying a failed record (seconds)
    pub backoff_min_secs: u64,
    /// Largest delay before retrying a failed record (seconds)
    pub backoff_max_secs: u64,
    /// Upper bound of one reconciliation, including every external call (seconds)
    pub reconcile_timeout_secs: u64,
    /// How often a provisioned bucket is observed again (seconds)
    pub bucket_poll_interval_secs: u64,
    /// How often a provisioned storage user is observed again (seconds)
    pub user_poll_interval_secs: u64,
    /// Delay between creating an external resource and observing it (seconds)
    pub create_requeue_secs: u64,
    /// Base URL of the account API
    pub account_api_url: String,
    /// Directory containing `tls.crt` and `tls.key` for the admission webhook.
    /// The webhook is disabled when unset.
    pub webhook_cert_dir: Option<PathBuf>,
    /// Port of the admission webhook
    pub webhook_port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            bucket_poll_interval_secs: DEFAULT_BUCKET_POLL_INTERVAL_SECS,
            user_poll_interval_secs: DEFAULT_USER_POLL_INTERVAL_SECS,
            create_requeue_secs: DEFAULT_CREATE_REQUEUE_SECS,
            account_api_url: DEFAULT_ACCOUNT_API_URL.to_string(),
            webhook_cert_dir: None,
            webhook_port: DEFAULT_WEBHOOK_PORT,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup with defaults
    ///
    /// Unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            metrics_port: parsed_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            backoff_min_secs: parsed_or(&lookup, "BACKOFF_MIN_SECS", defaults.backoff_min_secs),
            backoff_max_secs: parsed_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            reconcile_timeout_secs: parsed_or(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout_secs,
            ),
            bucket_poll_interval_secs: parsed_or(
                &lookup,
                "BUCKET_POLL_INTERVAL_SECS",
                defaults.bucket_poll_interval_secs,
            ),
            user_poll_interval_secs: parsed_or(
                &lookup,
                "USER_POLL_INTERVAL_SECS",
                defaults.user_poll_interval_secs,
            ),
            create_requeue_secs: parsed_or(
                &lookup,
                "CREATE_REQUEUE_SECS",
                defaults.create_requeue_secs,
            ),
            account_api_url: lookup("ACCOUNT_API_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.account_api_url),
            webhook_cert_dir: lookup("WEBHOOK_CERT_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            webhook_port: parsed_or(&lookup, "WEBHOOK_PORT", defaults.webhook_port),
        }
    }

    /// Get reconciliation timeout duration
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get bucket poll interval duration
    #[must_use]
    pub fn bucket_poll_interval(&self) -> Duration {
        Duration::from_secs(self.bucket_poll_interval_secs)
    }

    /// Get storage user poll interval duration
    #[must_use]
    pub fn user_poll_interval(&self) -> Duration {
        Duration::from_secs(self.user_poll_interval_secs)
    }

    /// Get post-create requeue duration
    #[must_use]
    pub fn create_requeue(&self) -> Duration {
        Duration::from_secs(self.create_requeue_secs)
    }
}

/// Read a key and parse it, or return the default value
fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
