//! # Object Storage Provisioner
//!
//! A Kubernetes controller that provisions S3 buckets and object-storage users
//! from declarative records.
//!
//! ## Overview
//!
//! - **`Bucket`** records are reconciled against an S3-compatible endpoint. The
//!   controller creates the bucket, keeps a connection secret up to date and, on
//!   deletion, optionally empties the bucket before removing it.
//! - **`StorageUser`** records are reconciled against the account API. The
//!   controller creates the user, keeps its display name and tags in sync and
//!   writes the user's key pair into a credentials secret.
//! - **`ProviderConfig`** records hold the account API token. Their usage is
//!   tracked so a config cannot be deleted while users still depend on it.
//!
//! A validating admission webhook keeps provisioned buckets from being renamed
//! or moved to another region.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
pub mod server;
