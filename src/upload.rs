//! Durable storage for finished backups

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{self, AsyncRead, AsyncWriteExt};
use tracing::info;

use crate::crd::Backup;
use crate::error::{Error, Result};

/// Name of the metadata document stored beside each backup
pub const METADATA_FILE: &str = "ark-backup.json";

/// Object key for a backup's data stream
pub fn backup_file_key(backup_name: &str) -> String {
    format!("{}.ndjson", backup_name)
}

/// Object key for a backup's log stream
pub fn log_file_key(backup_name: &str) -> String {
    format!("{}-logs.txt", backup_name)
}

/// Persists backup data and logs.
///
/// `data` and `log` are fed by a producer running at the same time, so an
/// implementation must drain both streams concurrently rather than one after
/// the other.
#[async_trait]
pub trait BackupUploader: Send + Sync {
    async fn upload_backup(
        &self,
        bucket: &str,
        backup_name: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
        log: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &Backup,
    ) -> Result<()>;
}

/// [`BackupUploader`] writing into a directory tree, typically a mounted PVC.
///
/// Layout: `<root>/<bucket>/<backup>/{ark-backup.json, <backup>.ndjson, <backup>-logs.txt}`
#[derive(Clone, Debug)]
pub struct FilesystemUploader {
    root: PathBuf,
}

impl FilesystemUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn backup_dir(&self, bucket: &str, backup_name: &str) -> PathBuf {
        self.root.join(bucket).join(backup_name)
    }
}

/// Reject names that would escape the storage root
fn check_path_component(kind: &str, value: &str) -> Result<()> {
    let traverses = value == "." || value == ".." || value.contains(['/', '\\']);
    if value.is_empty() || traverses {
        return Err(Error::upload(format!("invalid {} name '{}'", kind, value)));
    }
    Ok(())
}

async fn copy_to_file(reader: &mut (dyn AsyncRead + Send + Unpin), path: &Path) -> Result<u64> {
    let mut file = File::create(path).await?;
    let written = io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl BackupUploader for FilesystemUploader {
    async fn upload_backup(
        &self,
        bucket: &str,
        backup_name: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
        log: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &Backup,
    ) -> Result<()> {
        check_path_component("bucket", bucket)?;
        check_path_component("backup", backup_name)?;

        let dir = self.backup_dir(bucket, backup_name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::upload(format!("creating {}: {}", dir.display(), e)))?;

        let metadata_json = serde_json::to_vec_pretty(metadata)?;
        fs::write(dir.join(METADATA_FILE), metadata_json)
            .await
            .map_err(|e| Error::upload(format!("writing metadata: {}", e)))?;

        let data_path = dir.join(backup_file_key(backup_name));
        let log_path = dir.join(log_file_key(backup_name));
        let (data_bytes, log_bytes) =
            tokio::try_join!(copy_to_file(data, &data_path), copy_to_file(log, &log_path))
                .map_err(|e| Error::upload(format!("writing backup {}: {}", backup_name, e)))?;

        info!(
            bucket = bucket,
            backup = backup_name,
            data_bytes = data_bytes,
            log_bytes = log_bytes,
            "Uploaded backup"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BackupSpec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_writes_metadata_data_and_log() {
        let dir = tempdir().unwrap();
        let uploader = FilesystemUploader::new(dir.path());
        let backup = Backup::new("backup1", BackupSpec::default());

        let mut data: &[u8] = b"{\"kind\":\"Pod\"}\n";
        let mut log: &[u8] = b"started\n";
        uploader
            .upload_backup("bucket", "backup1", &mut data, &mut log, &backup)
            .await
            .unwrap();

        let backup_dir = uploader.backup_dir("bucket", "backup1");
        let stored = std::fs::read_to_string(backup_dir.join("backup1.ndjson")).unwrap();
        assert_eq!(stored, "{\"kind\":\"Pod\"}\n");
        let logs = std::fs::read_to_string(backup_dir.join("backup1-logs.txt")).unwrap();
        assert_eq!(logs, "started\n");

        let raw = std::fs::read(backup_dir.join(METADATA_FILE)).unwrap();
        let metadata: Backup = serde_json::from_slice(&raw).unwrap();
        assert_eq!(metadata.metadata.name.as_deref(), Some("backup1"));
    }

    #[tokio::test]
    async fn test_upload_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let uploader = FilesystemUploader::new(dir.path());
        let backup = Backup::new("backup1", BackupSpec::default());

        let mut data: &[u8] = b"";
        let mut log: &[u8] = b"";
        let err = uploader
            .upload_backup("bucket", "../escape", &mut data, &mut log, &backup)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
    }
}
