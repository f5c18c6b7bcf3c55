//! Reconcilers for Ark CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Validating CRD specs
//! - Executing backups
//! - Updating resource status

pub mod backup;
