//! BackupConfiguration: what to back up, how, and where.

use super::common::{
    EmptyDirSettings, LocalObjectRef, RuntimeSettings, TargetRef, TargetVolumeMount, TaskRef,
};
use crate::constants::{LABEL_INVOKER_NAME, LABEL_INVOKER_TYPE, LABEL_MANAGED_BY, STASH_GROUP};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// BackupConfiguration Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: stash.appscode.com/v1beta1
/// kind: BackupConfiguration
/// metadata:
///   name: sample-mysql-backup
///   namespace: demo
/// spec:
///   schedule: "*/5 * * * *"
///   task:
///     name: mysql-backup-8.0.14
///   repository:
///     name: gcs-repo
///   target:
///     ref:
///       apiVersion: appcatalog.appscode.com/v1alpha1
///       kind: AppBinding
///       name: sample-mysql
///   retentionPolicy:
///     name: keep-last-5
///     keepLast: 5
///     prune: true
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "BackupConfiguration",
    group = "stash.appscode.com",
    version = "v1beta1",
    namespaced,
    shortname = "bc",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Task", "type":"string", "jsonPath":".spec.task.name"}"#,
    printcolumn = r#"{"name":"Schedule", "type":"string", "jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".spec.paused"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfigurationSpec {
    /// Cron schedule of the sessions created for this configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Backup driver, `Restic` unless stated otherwise
    #[serde(default)]
    pub driver: Snapshotter,
    /// Repository receiving the backed-up data
    pub repository: LocalObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<BackupTarget>,
    /// Task resolved into the backup job's pod spec
    #[serde(default)]
    pub task: TaskRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicy>,
    /// Paused configurations skip every new session
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_settings: Option<RuntimeSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<EmptyDirSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_history_limit: Option<i32>,
}

/// Backup execution driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum Snapshotter {
    #[default]
    Restic,
    VolumeSnapshotter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupTarget {
    #[serde(rename = "ref")]
    pub target_ref: TargetRef,
    /// Directories to back up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<TargetVolumeMount>,
    /// Replica count override for StatefulSet targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
    /// Label selector addressing several objects of `ref.kind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_hourly: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_yearly: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_tags: Vec<String>,
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// How a target's data is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupModel {
    /// A sidecar injected into the workload takes the backup itself
    Sidecar,
    /// A dedicated Job takes the backup
    Job,
}

/// Workload kinds that run a Stash sidecar
const SIDECAR_KINDS: [&str; 6] = [
    "Deployment",
    "DaemonSet",
    "StatefulSet",
    "ReplicaSet",
    "ReplicationController",
    "DeploymentConfig",
];

/// Backup model implied by a target kind
pub fn backup_model(kind: &str) -> BackupModel {
    if SIDECAR_KINDS.contains(&kind) {
        BackupModel::Sidecar
    } else {
        BackupModel::Job
    }
}

impl BackupConfiguration {
    /// Labels stamped on every object provisioned for this configuration
    pub fn offshoot_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), STASH_GROUP.to_string()),
            (
                LABEL_INVOKER_TYPE.to_string(),
                "BackupConfiguration".to_string(),
            ),
            (LABEL_INVOKER_NAME.to_string(), self.name_any()),
        ])
    }

    /// Whether sessions of this configuration are handled by a workload sidecar
    pub fn uses_sidecar(&self) -> bool {
        self.spec.driver == Snapshotter::Restic
            && self
                .spec
                .target
                .as_ref()
                .is_some_and(|t| backup_model(&t.target_ref.kind) == BackupModel::Sidecar)
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        self.spec.runtime_settings.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(kind: &str, driver: Snapshotter) -> BackupConfiguration {
        BackupConfiguration::new(
            "backup",
            BackupConfigurationSpec {
                driver,
                target: Some(BackupTarget {
                    target_ref: TargetRef {
                        kind: kind.to_string(),
                        name: "app".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_backup_model_by_kind() {
        assert_eq!(backup_model("StatefulSet"), BackupModel::Sidecar);
        assert_eq!(backup_model("DeploymentConfig"), BackupModel::Sidecar);
        assert_eq!(backup_model("AppBinding"), BackupModel::Job);
        assert_eq!(backup_model("PersistentVolumeClaim"), BackupModel::Job);
    }

    #[test]
    fn test_volume_snapshotter_never_uses_sidecar() {
        assert!(configuration("Deployment", Snapshotter::Restic).uses_sidecar());
        assert!(!configuration("Deployment", Snapshotter::VolumeSnapshotter).uses_sidecar());
        assert!(!configuration("AppBinding", Snapshotter::Restic).uses_sidecar());
    }

    #[test]
    fn test_offshoot_labels() {
        let labels = configuration("AppBinding", Snapshotter::Restic).offshoot_labels();
        assert_eq!(labels.get(LABEL_INVOKER_NAME).map(String::as_str), Some("backup"));
        assert_eq!(
            labels.get(LABEL_MANAGED_BY).map(String::as_str),
            Some("stash.appscode.com")
        );
    }
}
