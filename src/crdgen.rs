//! # CRD Generator
//!
//! Generates the Kubernetes CustomResourceDefinition (CRD) YAML of every record kind
//! reconciled by the controller, as one multi-document stream.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/objectstorage.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use objectstore_provisioner::crd::{Bucket, ProviderConfig, ProviderConfigUsage, StorageUser};

fn main() {
    let crds = [
        Bucket::crd(),
        StorageUser::crd(),
        ProviderConfig::crd(),
        ProviderConfigUsage::crd(),
    ];

    for crd in crds {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => print!("---\n{yaml}"),
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
