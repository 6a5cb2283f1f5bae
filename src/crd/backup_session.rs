//! BackupSession: one execution attempt of a backup.

use super::common::{HostPhase, LocalObjectRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BackupSession Custom Resource Definition
///
/// Created by the backup scheduler (or manually) for every backup run of a
/// BackupConfiguration. The spec is immutable after creation; status is
/// written by the controller (phase, totalHosts) and by the job pods (stats).
///
/// # Example
///
/// ```yaml
/// apiVersion: stash.appscode.com/v1beta1
/// kind: BackupSession
/// metadata:
///   name: sample-mysql-backup-1561974001
///   namespace: demo
/// spec:
///   backupConfiguration:
///     name: sample-mysql-backup
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "BackupSession",
    group = "stash.appscode.com",
    version = "v1beta1",
    namespaced,
    status = "BackupSessionStatus",
    shortname = "bs",
    derive = "PartialEq",
    printcolumn = r#"{"name":"BackupConfiguration", "type":"string", "jsonPath":".spec.backupConfiguration.name"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSessionSpec {
    /// The BackupConfiguration this session executes
    pub backup_configuration: LocalObjectRef,
}

/// Lifecycle phase of a BackupSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BackupSessionPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl BackupSessionPhase {
    /// Terminal phases are absorbing: nothing moves a session out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for BackupSessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSessionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BackupSessionPhase>,
    /// Number of hosts expected to report; set on the transition to Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hosts: Option<i32>,
    /// Time from creation to success, e.g. `1m30s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
    /// One entry per reported host, unique by hostname
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<HostBackupStats>,
}

/// Result reported by one host of a backup
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostBackupStats {
    pub hostname: String,
    #[serde(default)]
    pub phase: HostPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SnapshotStats>,
    /// Wall time of the host's backup, e.g. `12.5s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostBackupStats {
    /// Non-empty error text, if the host reported one
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Statistics of one snapshot taken by a host
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_stats: Option<FileStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_files: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmodified_files: Option<i64>,
}

impl BackupSession {
    /// Recorded phase, if any
    pub fn phase(&self) -> Option<BackupSessionPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_some_and(BackupSessionPhase::is_terminal)
    }

    pub fn configuration_name(&self) -> &str {
        &self.spec.backup_configuration.name
    }
}
