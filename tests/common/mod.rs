//! Common fixtures for the integration tests
//!
//! Objects mirror the Stash MySQL backup tutorial: a `sample-mysql-backup`
//! BackupConfiguration in namespace `demo` backing up an AppBinding to a GCS
//! repository with the `mysql-backup-8.0.14` task.

#![allow(dead_code, reason = "each test binary uses a subset of the fixtures")]

use stash_controller::config::ControllerConfig;
use stash_controller::controller::client::{ClusterApi, MemoryClusterApi};
use stash_controller::controller::events::MemoryEventRecorder;
use stash_controller::controller::reconciler::{ObjectKey, Reconciler, ReconcilerSettings};
use stash_controller::controller::task::CrdTaskResolver;
use stash_controller::crd::{
    Backend, BackupConfiguration, BackupConfigurationSpec, BackupSession, BackupSessionPhase,
    BackupSessionSpec, BackupSessionStatus, BackupTarget, BucketSpec, Function, FunctionRef,
    FunctionSpec, HostBackupStats, HostPhase, LocalObjectRef, Param, Repository, RepositorySpec,
    RetentionPolicy, TargetRef, Task, TaskRef, TaskSpec,
};
use stash_controller::observability::RecordingMetricsSink;
use std::sync::Arc;

pub const NAMESPACE: &str = "demo";
pub const CONFIGURATION: &str = "sample-mysql-backup";
pub const REPOSITORY: &str = "gcs-repo";
pub const TASK: &str = "mysql-backup-8.0.14";

pub fn session(name: &str) -> BackupSession {
    let mut session = BackupSession::new(
        name,
        BackupSessionSpec {
            backup_configuration: LocalObjectRef {
                name: CONFIGURATION.to_string(),
            },
        },
    );
    session.metadata.namespace = Some(NAMESPACE.to_string());
    session
}

/// Session that is running and has collected `hosts` results
pub fn running_session(
    name: &str,
    total_hosts: i32,
    hosts: &[(&str, Option<&str>)],
) -> BackupSession {
    let mut session = session(name);
    session.status = Some(BackupSessionStatus {
        phase: Some(BackupSessionPhase::Running),
        total_hosts: Some(total_hosts),
        stats: hosts
            .iter()
            .map(|(hostname, error)| HostBackupStats {
                hostname: (*hostname).to_string(),
                phase: HostPhase::from_error(*error),
                snapshots: Vec::new(),
                duration: Some("10s".to_string()),
                error: error.map(str::to_string),
            })
            .collect(),
        ..Default::default()
    });
    session
}

pub fn configuration(target_kind: &str, target_name: &str) -> BackupConfiguration {
    let mut configuration = BackupConfiguration::new(
        CONFIGURATION,
        BackupConfigurationSpec {
            schedule: Some("*/5 * * * *".to_string()),
            repository: LocalObjectRef {
                name: REPOSITORY.to_string(),
            },
            target: Some(BackupTarget {
                target_ref: TargetRef {
                    api_version: None,
                    kind: target_kind.to_string(),
                    name: target_name.to_string(),
                },
                ..Default::default()
            }),
            task: TaskRef {
                name: TASK.to_string(),
                params: Vec::new(),
            },
            retention_policy: Some(RetentionPolicy {
                name: "keep-last-5".to_string(),
                keep_last: Some(5),
                prune: true,
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    configuration.metadata.namespace = Some(NAMESPACE.to_string());
    configuration
}

pub fn repository() -> Repository {
    let mut repository = Repository::new(
        REPOSITORY,
        RepositorySpec {
            backend: Backend {
                storage_secret_name: Some("gcs-secret".to_string()),
                gcs: Some(BucketSpec {
                    bucket: "appscode-qa".to_string(),
                    prefix: Some("/demo/mysql/sample-mysql".to_string()),
                }),
                ..Default::default()
            },
            wipe_out: false,
        },
    );
    repository.metadata.namespace = Some(NAMESPACE.to_string());
    repository
}

/// `mysql-backup-8.0.14` task: a backup step followed by a status update
pub fn task() -> (Task, Vec<Function>) {
    let output_dir = || Param {
        name: "outputDir".to_string(),
        value: "/tmp/output".to_string(),
    };
    let task = Task::new(
        TASK,
        TaskSpec {
            steps: vec![
                FunctionRef {
                    name: "mysql-backup-8.0.14".to_string(),
                    params: vec![output_dir()],
                },
                FunctionRef {
                    name: "update-status".to_string(),
                    params: vec![output_dir()],
                },
            ],
            volumes: Vec::new(),
        },
    );
    let backup = Function::new(
        "mysql-backup-8.0.14",
        FunctionSpec {
            image: "appscode/stash-mysql:8.0.14".to_string(),
            args: vec![
                "backup-mysql".to_string(),
                "--provider=${REPOSITORY_PROVIDER:=}".to_string(),
                "--bucket=${REPOSITORY_BUCKET:=}".to_string(),
                "--hostname=${HOSTNAME:=}".to_string(),
                "--output-dir=${outputDir:=}".to_string(),
                "--retention-keep-last=${RETENTION_KEEP_LAST:=0}".to_string(),
            ],
            ..Default::default()
        },
    );
    let update_status = Function::new(
        "update-status",
        FunctionSpec {
            image: "appscode/stash:v0.9.0".to_string(),
            args: vec![
                "update-status".to_string(),
                "--namespace=${NAMESPACE:=default}".to_string(),
                "--backup-session=${BACKUP_SESSION:=}".to_string(),
                "--repository=${REPOSITORY_NAME:=}".to_string(),
                "--output-dir=${outputDir:=}".to_string(),
            ],
            ..Default::default()
        },
    );
    (task, vec![backup, update_status])
}

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings::from_config(&ControllerConfig {
        stash_image_tag: "v0.9.0".to_string(),
        ..Default::default()
    })
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

/// A reconciler over an in-memory cluster, with its recorders exposed
pub struct Harness {
    pub api: Arc<MemoryClusterApi>,
    pub events: Arc<MemoryEventRecorder>,
    pub metrics: Arc<RecordingMetricsSink>,
    pub reconciler: Reconciler<MemoryClusterApi>,
}

impl Harness {
    pub fn new(settings: ReconcilerSettings) -> Self {
        let api = Arc::new(MemoryClusterApi::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let metrics = Arc::new(RecordingMetricsSink::new());
        let recorder = Arc::clone(&events);
        let sink = Arc::clone(&metrics);
        let reconciler = Reconciler::new(
            Arc::clone(&api),
            recorder,
            Arc::new(CrdTaskResolver::new(Arc::clone(&api))),
            settings,
        )
        .with_metrics(sink);
        Self {
            api,
            events,
            metrics,
            reconciler,
        }
    }

    /// Harness whose cluster already holds the repository and the task
    pub fn with_backend(settings: ReconcilerSettings) -> Self {
        let harness = Self::new(settings);
        harness.api.seed(repository()).unwrap();
        let (task, functions) = task();
        harness.api.seed(task).unwrap();
        for function in functions {
            harness.api.seed(function).unwrap();
        }
        harness
    }

    pub async fn session(&self, name: &str) -> BackupSession {
        self.api
            .get::<BackupSession>(Some(NAMESPACE), name)
            .await
            .unwrap()
            .expect("session exists")
    }

    pub async fn get<K: stash_controller::controller::client::Managed>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<K> {
        self.api.get::<K>(namespace, name).await.unwrap()
    }
}
