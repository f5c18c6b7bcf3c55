//! Custom Resource Definitions for the Ark backup controller

mod backup;

pub use backup::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&Backup::crd()).unwrap()]
}
