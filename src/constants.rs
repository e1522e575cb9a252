//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Durations and ports represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every custom resource managed by this controller
pub const API_GROUP: &str = "storage.microscaler.io";

/// API version of every custom resource managed by this controller
pub const API_VERSION: &str = "v1";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "objectstore-provisioner";

/// Finalizer protecting a `Bucket` until the external bucket is removed
pub const BUCKET_FINALIZER: &str = "storage.microscaler.io/bucket-protection";

/// Finalizer protecting a `StorageUser` (and its credentials secret) until the external user is removed
pub const USER_FINALIZER: &str = "storage.microscaler.io/user-protection";

/// Finalizer keeping a `ProviderConfig` alive while usages reference it
pub const PROVIDER_CONFIG_FINALIZER: &str = "storage.microscaler.io/in-use";

/// Annotation holding the external user ID until Observe promotes it to status
pub const USER_ID_ANNOTATION: &str = "storage.microscaler.io/user-id";

/// Label on `ProviderConfigUsage` records naming the referenced `ProviderConfig`
pub const PROVIDER_CONFIG_LABEL: &str = "storage.microscaler.io/provider-config";

/// Secret key holding the S3 access key ("username")
pub const ACCESS_KEY_ID_NAME: &str = "AWS_ACCESS_KEY_ID";

/// Secret key holding the S3 secret key ("password")
pub const SECRET_ACCESS_KEY_NAME: &str = "AWS_SECRET_ACCESS_KEY";

/// Bucket connection secret key holding the endpoint URL
pub const ENDPOINT_NAME: &str = "ENDPOINT";

/// Bucket connection secret key holding the region
pub const REGION_NAME: &str = "REGION";

/// Bucket connection secret key holding the bucket name
pub const BUCKET_NAME: &str = "BUCKET_NAME";

/// Secret key holding the account API token referenced by a `ProviderConfig`
pub const API_TOKEN_KEY: &str = "CLOUDSCALE_API_TOKEN";

/// `ProviderConfig` used when a `StorageUser` does not reference one
pub const DEFAULT_PROVIDER_CONFIG_NAME: &str = "default";

/// Default base URL of the account API
pub const DEFAULT_ACCOUNT_API_URL: &str = "https://api.cloudscale.ch/v1/";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTPS port for the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Minimum per-record backoff after a failed reconciliation (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Maximum per-record backoff after a failed reconciliation (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Upper bound for a single reconciliation, external calls included (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;

/// Requeue interval for provisioned buckets (seconds)
pub const DEFAULT_BUCKET_POLL_INTERVAL_SECS: u64 = 3600;

/// Requeue interval for provisioned storage users (seconds)
pub const DEFAULT_USER_POLL_INTERVAL_SECS: u64 = 600;

/// Requeue interval right after an external resource was created (seconds)
pub const DEFAULT_CREATE_REQUEUE_SECS: u64 = 2;

/// Requeue interval for a `ProviderConfig` that is blocked from deletion (seconds)
pub const PROVIDER_CONFIG_IN_USE_REQUEUE_SECS: u64 = 30;

/// Capacity of the channel between object listing and bulk deletion
pub const OBJECT_LISTING_BUFFER: usize = 1000;

/// Maximum number of keys the S3 API accepts in one DeleteObjects request
pub const MAX_KEYS_PER_BULK_DELETE: usize = 1000;
