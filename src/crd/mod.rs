//! # Custom Resource Definitions
//!
//! Stash resource types read and written by the controller.
//!
//! ## Module Structure
//!
//! - `backup_session.rs` - BackupSession and per-host backup statistics
//! - `backup_configuration.rs` - BackupConfiguration, targets, backup model
//! - `restore_session.rs` - RestoreSession and per-host restore statistics
//! - `repository.rs` - Repository and storage backends
//! - `task.rs` - Task and Function, consumed by task resolution
//! - `common.rs` - Shared references, runtime settings and volume sources

mod backup_configuration;
mod backup_session;
mod common;
mod repository;
mod restore_session;
mod task;

pub use backup_configuration::{
    backup_model, BackupConfiguration, BackupConfigurationSpec, BackupModel, BackupTarget,
    RetentionPolicy, Snapshotter,
};
pub use backup_session::{
    BackupSession, BackupSessionPhase, BackupSessionSpec, BackupSessionStatus, FileStats,
    HostBackupStats, SnapshotStats,
};
pub use common::{
    ClaimVolume, ContainerRuntimeSettings, EmptyDirSettings, EnvVarSpec, HostPathVolume,
    HostPhase, LocalObjectRef, NfsVolume, Param, PodRuntimeSettings, ResourceRequirementsSpec,
    RuntimeSettings, TargetRef, TargetVolumeMount, TaskRef, TolerationSpec, VolumeSource,
};
pub use repository::{
    Backend, BucketSpec, ContainerSpec, LocalSpec, Repository, RepositorySpec, RepositoryStatus,
    RestServerSpec, S3Spec,
};
pub use restore_session::{
    HostRestoreStats, RestorePhase, RestoreSession, RestoreSessionSpec, RestoreSessionStatus,
    RestoreTarget, Rule,
};
pub use task::{
    Function, FunctionRef, FunctionSpec, FunctionVolumeMount, Task, TaskSpec, TaskVolume,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Definitions of every Stash custom resource the controller uses
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        BackupSession::crd(),
        BackupConfiguration::crd(),
        RestoreSession::crd(),
        Repository::crd(),
        Task::crd(),
        Function::crd(),
    ]
}
