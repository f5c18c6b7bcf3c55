//! Controller configuration
//!
//! Every option can be given as a flag or through the environment, so the
//! same image runs unchanged from a Deployment manifest.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};

/// Namespace Ark resources live in unless configured otherwise
pub const DEFAULT_NAMESPACE: &str = "heptio-ark";

/// Ark backup controller
#[derive(Parser, Debug, Clone)]
#[command(name = "ark-backup-controller", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Print the Backup CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace whose Backup resources are processed
    #[arg(long, env = "ARK_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Bucket that finished backups are uploaded to
    #[arg(long, env = "ARK_BACKUP_BUCKET", default_value = "")]
    pub bucket: String,

    /// Allow backups that request persistent volume snapshots
    #[arg(long, env = "ARK_ALLOW_SNAPSHOTS", default_value_t = false)]
    pub allow_snapshots: bool,

    /// Directory buckets are created under
    #[arg(long, env = "ARK_BACKUP_ROOT", default_value = "/data/backups")]
    pub backup_root: PathBuf,

    /// Port serving /metrics, /healthz and /readyz
    #[arg(long, env = "ARK_METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Maximum number of distinct backups processed at once
    #[arg(long, env = "ARK_WORKERS", default_value_t = 1)]
    pub workers: u16,
}

impl ControllerConfig {
    /// Check settings that clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.bucket.trim().is_empty() {
            return Err(Error::config(
                "a backup bucket is required (--bucket or ARK_BACKUP_BUCKET)",
            ));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        Ok(())
    }
}
