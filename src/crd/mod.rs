//! # Custom Resource Definitions
//!
//! CRD types reconciled by the controller.
//!
//! ## Module Structure
//!
//! - `bucket.rs` - `Bucket` records (an S3 bucket)
//! - `user.rs` - `StorageUser` records (an object-storage credential user)
//! - `provider_config.rs` - `ProviderConfig` and its usage tracking records
//! - `status.rs` - Conditions and references shared by every record kind

mod bucket;
mod provider_config;
mod status;
mod user;

pub use bucket::{Bucket, BucketDeletionPolicy, BucketSpec, BucketStatus};
pub use provider_config::{
    ProviderConfig, ProviderConfigSpec, ProviderConfigStatus, ProviderConfigUsage,
    ProviderConfigUsageSpec, ProviderCredentials, TypedReference,
};
pub use status::{Condition, ProviderConfigReference, SecretReference};
pub use user::{StorageUser, StorageUserSpec, StorageUserStatus};
