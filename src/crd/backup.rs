//! Backup Custom Resource Definition

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Marker meaning "every namespace" in an include list
pub use crate::collections::WILDCARD as ALL_NAMESPACES;

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ark.heptio.com",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "BackupStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Expiration", "type": "string", "jsonPath": ".status.expiration"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Namespaces to include; empty means all namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Namespaces to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,

    /// Resources to include; empty means all resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Resources to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Whether to snapshot persistent volumes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_volumes: Option<bool>,

    /// Retention period (e.g. "720h", "10m"); zero means the backup never expires
    #[serde(default, with = "ttl_format")]
    #[schemars(with = "String")]
    pub ttl: Duration,
}

/// Backup status, owned by the controller
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current phase (New, InProgress, Completed, Failed, FailedValidation)
    #[serde(default)]
    #[schemars(with = "String")]
    pub phase: BackupPhase,

    /// Backup format version
    #[serde(default)]
    pub version: u32,

    /// When the backup is eligible for garbage collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    /// Problems found while validating the spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

/// Lifecycle phase of a Backup.
///
/// Values written by other tools that this controller does not recognise are
/// kept verbatim in `Unknown` so they round-trip and are never acted upon.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum BackupPhase {
    #[default]
    New,
    InProgress,
    Completed,
    Failed,
    FailedValidation,
    Unknown(String),
}

impl BackupPhase {
    pub fn as_str(&self) -> &str {
        match self {
            BackupPhase::New => "New",
            BackupPhase::InProgress => "InProgress",
            BackupPhase::Completed => "Completed",
            BackupPhase::Failed => "Failed",
            BackupPhase::FailedValidation => "FailedValidation",
            BackupPhase::Unknown(other) => other,
        }
    }

    /// Only a New backup is eligible for processing; every other phase is
    /// terminal from the controller's point of view.
    pub fn is_processable(&self) -> bool {
        matches!(self, BackupPhase::New)
    }
}

impl From<String> for BackupPhase {
    fn from(value: String) -> Self {
        match value.as_str() {
            // An unset phase is how freshly created objects arrive
            "" | "New" => BackupPhase::New,
            "InProgress" => BackupPhase::InProgress,
            "Completed" => BackupPhase::Completed,
            "Failed" => BackupPhase::Failed,
            "FailedValidation" => BackupPhase::FailedValidation,
            _ => BackupPhase::Unknown(value),
        }
    }
}

impl From<&str> for BackupPhase {
    fn from(value: &str) -> Self {
        BackupPhase::from(value.to_string())
    }
}

impl From<BackupPhase> for String {
    fn from(phase: BackupPhase) -> Self {
        phase.as_str().to_string()
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Backup {
    /// Current phase, treating a missing status as New
    pub fn phase(&self) -> BackupPhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or_default()
    }

    /// Mutable access to the status, creating an empty one if needed
    pub fn status_mut(&mut self) -> &mut BackupStatus {
        self.status.get_or_insert_with(BackupStatus::default)
    }
}

/// Serde adapter for the TTL field using human readable durations
mod ttl_format {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if ttl.is_zero() {
            return serializer.serialize_str("0s");
        }
        serializer.serialize_str(&humantime::format_duration(*ttl).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Ok(Duration::ZERO);
        }
        humantime::parse_duration(raw)
            .map_err(|e| D::Error::custom(format!("invalid ttl '{}': {}", raw, e)))
    }
}
