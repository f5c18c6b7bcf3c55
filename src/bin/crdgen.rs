//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the Backup resource.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/backup.yaml

use ark_backup_controller::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
