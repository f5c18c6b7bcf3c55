//! Kubernetes controllers for Ark CRDs
//!
//! This module contains the controller implementations that watch for CRD changes
//! and trigger reconciliation.

mod backup_controller;

pub use backup_controller::run as run_backup_controller;

use crate::reconcilers::backup::BackupController;

/// Shared context for all controllers
pub struct Context {
    /// Backup reconciler
    pub backups: BackupController,
}

impl Context {
    /// Create a new context
    pub fn new(backups: BackupController) -> Self {
        Self { backups }
    }
}
