//! # Runtime
//!
//! Watch loops and error policy wiring the reconcilers into `kube-runtime`.

pub mod error_policy;
pub mod watch_loop;
