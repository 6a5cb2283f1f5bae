//! # CRD YAML Tests
//!
//! Sample manifests from the Stash documentation deserialize into the CRD
//! types, and the generated CustomResourceDefinitions carry the expected
//! names and scopes.

use kube::CustomResourceExt;
use stash_controller::crd::{
    all_crds, BackupConfiguration, BackupSession, BackupSessionPhase, HostPhase, Repository,
    RestoreSession, Snapshotter, Task,
};

#[test]
fn test_backup_configuration_manifest() {
    let yaml = r#"
apiVersion: stash.appscode.com/v1beta1
kind: BackupConfiguration
metadata:
  name: sample-mysql-backup
  namespace: demo
spec:
  schedule: "*/5 * * * *"
  task:
    name: mysql-backup-8.0.14
    params:
      - name: args
        value: --all-databases
  repository:
    name: gcs-repo
  target:
    ref:
      apiVersion: appcatalog.appscode.com/v1alpha1
      kind: AppBinding
      name: sample-mysql
  retentionPolicy:
    name: keep-last-5
    keepLast: 5
    prune: true
  runtimeSettings:
    pod:
      serviceAccountName: mysql-backup-sa
"#;

    let configuration: BackupConfiguration =
        serde_yaml::from_str(yaml).expect("Should deserialize BackupConfiguration");

    assert_eq!(configuration.spec.driver, Snapshotter::Restic);
    assert!(!configuration.spec.paused);
    assert_eq!(configuration.spec.task.params[0].value, "--all-databases");
    let target = configuration.spec.target.as_ref().unwrap();
    assert_eq!(target.target_ref.kind, "AppBinding");
    assert_eq!(
        configuration.spec.retention_policy.as_ref().unwrap().keep_last,
        Some(5)
    );
    assert_eq!(
        configuration.runtime_settings().service_account_name(),
        Some("mysql-backup-sa")
    );
    assert!(!configuration.uses_sidecar());
}

#[test]
fn test_volume_snapshot_configuration_manifest() {
    let yaml = r#"
apiVersion: stash.appscode.com/v1beta1
kind: BackupConfiguration
metadata:
  name: statefulset-volume-snapshot
  namespace: demo
spec:
  schedule: "*/5 * * * *"
  driver: VolumeSnapshotter
  repository:
    name: ""
  target:
    ref:
      apiVersion: apps/v1
      kind: StatefulSet
      name: stash-demo
    replicas: 1
    volumeSnapshotClassName: default-snapshot-class
"#;

    let configuration: BackupConfiguration =
        serde_yaml::from_str(yaml).expect("Should deserialize VolumeSnapshotter configuration");
    assert_eq!(configuration.spec.driver, Snapshotter::VolumeSnapshotter);
    assert_eq!(configuration.spec.target.as_ref().unwrap().replicas, Some(1));
    assert!(!configuration.uses_sidecar());
}

#[test]
fn test_backup_session_with_status() {
    let yaml = r#"
apiVersion: stash.appscode.com/v1beta1
kind: BackupSession
metadata:
  name: sample-mysql-backup-1561974001
  namespace: demo
spec:
  backupConfiguration:
    name: sample-mysql-backup
status:
  phase: Succeeded
  totalHosts: 1
  sessionDuration: 1m12s
  stats:
    - hostname: host-0
      phase: Succeeded
      duration: 40.45s
      snapshots:
        - name: 3c9ba6b5
          path: /var/lib/mysql
          totalSizeBytes: 1048576
          fileStats:
            totalFiles: 12
            newFiles: 2
"#;

    let session: BackupSession = serde_yaml::from_str(yaml).expect("Should deserialize BackupSession");
    assert_eq!(session.configuration_name(), "sample-mysql-backup");
    assert_eq!(session.phase(), Some(BackupSessionPhase::Succeeded));
    assert!(session.is_terminal());
    let status = session.status.unwrap();
    assert_eq!(status.stats[0].phase, HostPhase::Succeeded);
    assert_eq!(
        status.stats[0].snapshots[0]
            .file_stats
            .as_ref()
            .and_then(|f| f.new_files),
        Some(2)
    );
}

#[test]
fn test_repository_backends() {
    let yaml = r#"
apiVersion: stash.appscode.com/v1alpha1
kind: Repository
metadata:
  name: local-repo
  namespace: demo
spec:
  backend:
    local:
      mountPath: /safe/data
      hostPath:
        path: /data/stash-test/restic-repo
    storageSecretName: local-secret
"#;
    let repository: Repository = serde_yaml::from_str(yaml).expect("Should deserialize Repository");
    assert_eq!(repository.spec.backend.provider(), Some("local"));
    assert_eq!(
        repository.spec.backend.local.as_ref().unwrap().mount_path,
        "/safe/data"
    );

    let yaml = r#"
apiVersion: stash.appscode.com/v1alpha1
kind: Repository
metadata:
  name: minio-repo
  namespace: demo
spec:
  backend:
    s3:
      endpoint: https://minio-nodeport.demo.svc:9000
      bucket: stash-repo
      prefix: /source/data
    storageSecretName: minio-secret
"#;
    let repository: Repository = serde_yaml::from_str(yaml).expect("Should deserialize s3 backend");
    assert_eq!(repository.spec.backend.provider(), Some("s3"));
    assert_eq!(repository.spec.backend.bucket(), Some("stash-repo"));
    assert_eq!(
        repository.spec.backend.endpoint(),
        Some("https://minio-nodeport.demo.svc:9000")
    );
}

#[test]
fn test_restore_session_manifest() {
    let yaml = r#"
apiVersion: stash.appscode.com/v1beta1
kind: RestoreSession
metadata:
  name: sample-mysql-restore
  namespace: demo
spec:
  task:
    name: mysql-restore-8.0.14
  repository:
    name: gcs-repo
  target:
    ref:
      apiVersion: appcatalog.appscode.com/v1alpha1
      kind: AppBinding
      name: restored-mysql
  rules:
    - snapshots: [latest]
"#;
    let restore: RestoreSession = serde_yaml::from_str(yaml).expect("Should deserialize RestoreSession");
    assert_eq!(restore.spec.repository.name, "gcs-repo");
    assert_eq!(restore.spec.rules[0].snapshots, vec!["latest".to_string()]);
}

#[test]
fn test_generated_crds() {
    let crds = all_crds();
    let names: Vec<_> = crds
        .iter()
        .map(|crd| crd.metadata.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(
        names,
        vec![
            "backupsessions.stash.appscode.com",
            "backupconfigurations.stash.appscode.com",
            "restoresessions.stash.appscode.com",
            "repositories.stash.appscode.com",
            "tasks.stash.appscode.com",
            "functions.stash.appscode.com",
        ]
    );

    let session = BackupSession::crd();
    assert_eq!(session.spec.scope, "Namespaced");
    assert_eq!(
        session.spec.names.short_names,
        Some(vec!["bs".to_string()])
    );
    assert!(session.spec.versions[0]
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());

    assert_eq!(Task::crd().spec.scope, "Cluster");
    assert_eq!(Repository::crd().spec.versions[0].name, "v1alpha1");

    let yaml = serde_yaml::to_string(&session).unwrap();
    assert!(yaml.contains("kind: CustomResourceDefinition"));
}
