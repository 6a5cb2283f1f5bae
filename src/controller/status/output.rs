//! Result files written by backup and restore steps.

use crate::crd::{HostBackupStats, HostRestoreStats};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Repository state observed after a backup
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots_removed_on_last_cleanup: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutput {
    #[serde(default)]
    pub host_backup_stats: Vec<HostBackupStats>,
    #[serde(default)]
    pub repository_stats: RepositoryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutput {
    #[serde(default)]
    pub host_restore_stats: Vec<HostRestoreStats>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidOutput(format!("{}: {e}", path.display())))
}

impl BackupOutput {
    pub fn read_from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Every host finished without an error
    pub fn succeeded(&self) -> bool {
        self.host_backup_stats
            .iter()
            .all(|h| h.error_message().is_none())
    }
}

impl RestoreOutput {
    pub fn read_from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }
}
