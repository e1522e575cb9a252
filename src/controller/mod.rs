//! # Controller
//!
//! Core controller modules for the object storage provisioner.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `bucket`: `Bucket` lifecycle and admission checks
//! - `conditions`: Status condition helpers
//! - `events`: Kubernetes event publishing
//! - `managed`: Generic connect/observe/create/update/delete reconciler
//! - `pipeline`: Step pipelines the lifecycle operations are written in
//! - `provider_config`: `ProviderConfig` usage accounting
//! - `store`: Record, secret and `ProviderConfig` access
//! - `user`: `StorageUser` lifecycle

pub mod backoff;
pub mod bucket;
pub mod conditions;
pub mod events;
pub mod managed;
pub mod pipeline;
pub mod provider_config;
pub mod store;
pub mod user;
