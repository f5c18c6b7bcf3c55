//! Backup reconciler
//!
//! Turns a New Backup into an executed, uploaded backup exactly once:
//! - Spec validation
//! - Namespace defaulting and expiration
//! - Backup production streamed into the upload sink
//! - Status updates

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing::{debug, error, info, instrument, warn};

use crate::backupper::{write_log_line, Backupper};
use crate::clock::{Clock, SystemClock};
use crate::collections::validate_includes_excludes;
use crate::crd::{Backup, BackupPhase, BackupSpec, ALL_NAMESPACES};
use crate::error::{Error, Result};
use crate::metrics;
use crate::plugin::PluginManager;
use crate::store::ResourceStore;
use crate::upload::BackupUploader;

/// Version stamped into the status of every backup this controller runs
pub const BACKUP_VERSION: u32 = 1;

/// Buffer size of each in-memory pipe between the backupper and the uploader
const PIPE_CAPACITY: usize = 64 * 1024;

/// Validate a Backup spec against the server's snapshot policy.
///
/// Checks always run in the same order (resources, namespaces, snapshots)
/// and every problem is reported, not just the first.
pub fn validate(
    spec: &BackupSpec,
    allow_snapshots: bool,
) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for err in validate_includes_excludes(&spec.included_resources, &spec.excluded_resources) {
        errors.push(format!("Invalid included/excluded resource lists: {}", err));
    }

    for err in validate_includes_excludes(&spec.included_namespaces, &spec.excluded_namespaces) {
        errors.push(format!("Invalid included/excluded namespace lists: {}", err));
    }

    if !allow_snapshots && spec.snapshot_volumes == Some(true) {
        errors.push("Server is not configured for PV snapshots".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Widen an empty namespace include list to every namespace.
///
/// A non-empty list is left exactly as the user wrote it.
pub fn default_included_namespaces(spec: &mut BackupSpec) {
    if spec.included_namespaces.is_empty() {
        spec.included_namespaces = vec![ALL_NAMESPACES.to_string()];
    }
}

/// Expiration for a backup processed at `now`, or None when the TTL is zero.
///
/// A TTL whose expiration cannot be represented is an error rather than a
/// backup that never expires.
pub fn expiration_for(
    spec: &BackupSpec,
    now: DateTime<Utc>,
) -> std::result::Result<Option<DateTime<Utc>>, String> {
    if spec.ttl.is_zero() {
        return Ok(None);
    }
    chrono::Duration::from_std(spec.ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map(Some)
        .ok_or_else(|| {
            format!(
                "Invalid ttl {}: expiration is out of range",
                humantime::format_duration(spec.ttl)
            )
        })
}

/// Phase a backup ends in once production and upload have both finished
pub fn terminal_phase(produced: &Result<()>, uploaded: &Result<()>) -> BackupPhase {
    match (produced, uploaded) {
        (Ok(()), Ok(())) => BackupPhase::Completed,
        _ => BackupPhase::Failed,
    }
}

/// Split a `namespace/name` queue key. A bare name has an empty namespace.
pub fn split_key(key: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((String::new(), name.to_string())),
        [namespace, name] if !name.is_empty() => Ok((namespace.to_string(), name.to_string())),
        _ => Err(Error::InvalidKey(format!("unexpected key format: {:?}", key))),
    }
}

/// Processes Backup keys delivered by the controller queue
pub struct BackupController {
    store: Arc<dyn ResourceStore>,
    backupper: Arc<dyn Backupper>,
    uploader: Arc<dyn BackupUploader>,
    plugins: Arc<dyn PluginManager>,
    clock: Arc<dyn Clock>,
    bucket: String,
    allow_snapshots: bool,
}

impl BackupController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        backupper: Arc<dyn Backupper>,
        uploader: Arc<dyn BackupUploader>,
        plugins: Arc<dyn PluginManager>,
        bucket: impl Into<String>,
        allow_snapshots: bool,
    ) -> Self {
        Self {
            store,
            backupper,
            uploader,
            plugins,
            clock: Arc::new(SystemClock),
            bucket: bucket.into(),
            allow_snapshots,
        }
    }

    /// Replace the time source used for expirations
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process the Backup identified by `key`.
    ///
    /// Only a bad key, a missing object or a failed status write is returned
    /// as an error. Validation and backup failures are recorded in the
    /// Backup's status instead, since retrying cannot fix them.
    #[instrument(skip_all, fields(backup = %key))]
    pub async fn process_backup(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key)?;

        debug!("Getting backup");
        let cached = self.store.get(&namespace, &name)?;

        let phase = cached.phase();
        if !phase.is_processable() {
            debug!(phase = %phase, "Backup is not New, skipping");
            return Ok(());
        }

        info!("Processing backup");
        // The cached object is shared with other workers; only mutate a copy
        let mut request = Backup::clone(&cached);

        let mut errors = validate(&request.spec, self.allow_snapshots).err().unwrap_or_default();
        let expiration = expiration_for(&request.spec, self.clock.now()).unwrap_or_else(|e| {
            errors.push(e);
            None
        });

        if !errors.is_empty() {
            warn!(errors = ?errors, "Backup failed validation");
            let status = request.status_mut();
            status.phase = BackupPhase::FailedValidation;
            status.validation_errors = errors;
            self.update_status(&request).await?;
            record_outcome(&request, &namespace, &name);
            return Ok(());
        }

        default_included_namespaces(&mut request.spec);

        let status = request.status_mut();
        if status.expiration.is_none() {
            status.expiration = expiration;
        }
        status.phase = BackupPhase::InProgress;
        status.version = BACKUP_VERSION;

        // From here on the backup either reaches a terminal phase or stays
        // InProgress if the process dies; it is never run twice.
        let mut request = self.update_status(&request).await?;

        let timer = metrics::BACKUP_DURATION
            .with_label_values(&[&namespace, &name])
            .start_timer();
        let (produced, uploaded) = self.run_backup(&request, &name).await;
        timer.observe_duration();

        if let Err(e) = &produced {
            error!(error = %e, "Backup failed");
        }
        if let Err(e) = &uploaded {
            error!(error = %e, "Backup upload failed");
        }

        request.status_mut().phase = terminal_phase(&produced, &uploaded);
        info!(phase = %request.phase(), "Backup finished");
        let request = self.update_status(&request).await?;
        record_outcome(&request, &namespace, &name);
        Ok(())
    }

    /// Produce the backup while concurrently streaming it to the upload sink
    async fn run_backup(&self, backup: &Backup, name: &str) -> (Result<()>, Result<()>) {
        let (data_writer, data_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (log_writer, log_reader) = tokio::io::duplex(PIPE_CAPACITY);

        let produce = self.produce(backup, name, data_writer, log_writer);
        // The readers move into the upload so an early upload failure or panic closes
        // the pipes and the producer sees a broken pipe instead of blocking.
        let upload = async move {
            let (mut data_reader, mut log_reader) = (data_reader, log_reader);
            let uploaded = AssertUnwindSafe(self.uploader.upload_backup(
                &self.bucket,
                name,
                &mut data_reader,
                &mut log_reader,
                backup,
            ))
            .catch_unwind()
            .await;
            uploaded.unwrap_or_else(|_| Err(Error::upload("upload sink panicked")))
        };

        tokio::join!(produce, upload)
    }

    /// Acquire item actions, run the backupper and release the actions.
    ///
    /// Release happens exactly once whatever acquisition or production did,
    /// including panics.
    async fn produce(
        &self,
        backup: &Backup,
        name: &str,
        mut data: DuplexStream,
        mut log: DuplexStream,
    ) -> Result<()> {
        let acquired = AssertUnwindSafe(self.plugins.get_backup_item_actions(name))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::plugin("getting backup item actions panicked")));

        let result = match acquired {
            Ok(actions) => {
                AssertUnwindSafe(self.backupper.backup(backup, &mut data, &mut log, &actions))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::backupper("backupper panicked")))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.plugins.close_backup_item_actions(name).await {
            warn!(error = %e, "Failed to close backup item actions");
        }

        // The error variant names the stage that failed
        if let Err(e) = &result {
            if let Err(log_err) = write_log_line(&mut log, &format!("Backup failed: {}", e)).await {
                debug!(error = %log_err, "Failed to write failure to backup log");
            }
        }

        // Signal end of stream to the uploader
        if let Err(e) = data.shutdown().await {
            debug!(error = %e, "Failed to close backup data stream");
        }
        if let Err(e) = log.shutdown().await {
            debug!(error = %e, "Failed to close backup log stream");
        }
        result
    }

    /// Persist the full working copy and return what the server stored
    async fn update_status(&self, backup: &Backup) -> Result<Backup> {
        debug!(phase = %backup.phase(), "Updating backup status");
        self.store.update(backup).await
    }
}

fn record_outcome(backup: &Backup, namespace: &str, name: &str) {
    let outcome = match backup.phase() {
        BackupPhase::Completed => "completed",
        BackupPhase::Failed => "failed",
        BackupPhase::FailedValidation => "failed_validation",
        _ => return,
    };
    metrics::BACKUPS_TOTAL
        .with_label_values(&[outcome, namespace, name])
        .inc();
}
