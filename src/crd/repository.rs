//! Repository: a restic repository on some storage backend.

use super::common::VolumeSource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Repository",
    group = "stash.appscode.com",
    version = "v1alpha1",
    plural = "repositories",
    namespaced,
    status = "RepositoryStatus",
    shortname = "repo",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Integrity", "type":"boolean", "jsonPath":".status.integrity"}"#,
    printcolumn = r#"{"name":"Size", "type":"string", "jsonPath":".status.size"}"#,
    printcolumn = r#"{"name":"Snapshot-Count", "type":"integer", "jsonPath":".status.snapshotCount"}"#,
    printcolumn = r#"{"name":"Last-Successful-Backup", "type":"date", "jsonPath":".status.lastBackupTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub backend: Backend,
    /// Delete the backed-up data when the Repository is deleted
    #[serde(default)]
    pub wipe_out: bool,
}

/// Storage backend; exactly one of the provider fields is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestServerSpec>,
}

/// Backend on a volume mounted into the job pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(flatten)]
    pub volume_source: VolumeSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestServerSpec {
    pub url: String,
}

impl Backend {
    /// Provider name as understood by the backup functions
    pub fn provider(&self) -> Option<&'static str> {
        if self.local.is_some() {
            Some("local")
        } else if self.s3.is_some() {
            Some("s3")
        } else if self.gcs.is_some() {
            Some("gcs")
        } else if self.azure.is_some() {
            Some("azure")
        } else if self.swift.is_some() {
            Some("swift")
        } else if self.b2.is_some() {
            Some("b2")
        } else if self.rest.is_some() {
            Some("rest")
        } else {
            None
        }
    }

    /// Bucket or container name
    pub fn bucket(&self) -> Option<&str> {
        self.s3
            .as_ref()
            .map(|s| s.bucket.as_str())
            .or_else(|| self.gcs.as_ref().map(|g| g.bucket.as_str()))
            .or_else(|| self.b2.as_ref().map(|b| b.bucket.as_str()))
            .or_else(|| self.azure.as_ref().map(|a| a.container.as_str()))
            .or_else(|| self.swift.as_ref().map(|s| s.container.as_str()))
    }

    /// Path prefix inside the bucket, or the mount path of a local backend
    pub fn prefix(&self) -> Option<&str> {
        self.s3
            .as_ref()
            .and_then(|s| s.prefix.as_deref())
            .or_else(|| self.gcs.as_ref().and_then(|g| g.prefix.as_deref()))
            .or_else(|| self.b2.as_ref().and_then(|b| b.prefix.as_deref()))
            .or_else(|| self.azure.as_ref().and_then(|a| a.prefix.as_deref()))
            .or_else(|| self.swift.as_ref().and_then(|s| s.prefix.as_deref()))
            .or_else(|| self.local.as_ref().map(|l| l.mount_path.as_str()))
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.s3.as_ref().map(|s| s.endpoint.as_str())
    }

    pub fn url(&self) -> Option<&str> {
        self.rest.as_ref().map(|r| r.url.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// RFC 3339 time of the first successful backup; never overwritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_backup_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<bool>,
    /// Human readable repository size, e.g. `10.5 MiB`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots_removed_on_last_cleanup: Option<i64>,
}
