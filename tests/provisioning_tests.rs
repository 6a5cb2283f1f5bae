//! # Provisioning Tests
//!
//! ServiceAccount, RBAC and Job convergence against the in-memory cluster.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use stash_controller::controller::client::{ClusterApi, MemoryClusterApi};
use stash_controller::controller::provision::{
    ensure_job, ensure_rbac, ensure_service_account, role_binding_name, sanitize_name,
    EnsureOutcome, JobKind,
};
use std::collections::BTreeMap;

const NAMESPACE: &str = "demo";
const RETRIES: u32 = 5;

fn owner(name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "stash.appscode.com/v1beta1".to_string(),
        kind: "BackupConfiguration".to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        block_owner_deletion: Some(true),
        controller: None,
    }
}

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "app.kubernetes.io/managed-by".to_string(),
        "stash.appscode.com".to_string(),
    )])
}

fn template(image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "backup".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn psp_names(role: &ClusterRole) -> Vec<String> {
    role.rules
        .iter()
        .flatten()
        .find(|r| r.resources.as_deref() == Some(&["podsecuritypolicies".to_string()][..]))
        .and_then(|r| r.resource_names.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_service_account_is_idempotent() {
    let api = MemoryClusterApi::new();
    let owner = owner("sample-mysql-backup", "uid-1");

    let first = ensure_service_account(
        &api,
        NAMESPACE,
        "sample-mysql-backup",
        &owner,
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();
    let second = ensure_service_account(
        &api,
        NAMESPACE,
        "sample-mysql-backup",
        &owner,
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::Unchanged);
    let sa: ServiceAccount = api
        .get(Some(NAMESPACE), "sample-mysql-backup")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sa.metadata.owner_references, Some(vec![owner]));
    assert_eq!(sa.metadata.labels, Some(labels()));
}

#[tokio::test]
async fn test_shared_cluster_role_accumulates_psps() {
    let api = MemoryClusterApi::new();

    ensure_rbac(
        &api,
        JobKind::BackupJob,
        NAMESPACE,
        "mysql-backup",
        &owner("mysql-backup", "uid-1"),
        &["restricted".to_string()],
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();
    ensure_rbac(
        &api,
        JobKind::BackupJob,
        "prod",
        "pg-backup",
        &owner("pg-backup", "uid-2"),
        &["baseline".to_string()],
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();

    let role: ClusterRole = api.get(None, "stash-backup-job").await.unwrap().unwrap();
    assert_eq!(psp_names(&role), vec!["baseline", "restricted"]);
    assert_eq!(api.writes_of("ClusterRole").len(), 2);

    let mysql: RoleBinding = api
        .get(Some(NAMESPACE), "stash-backup-job-mysql-backup")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mysql.role_ref.name, "stash-backup-job");
    let subjects = mysql.subjects.unwrap();
    assert_eq!(subjects[0].name, "mysql-backup");
    assert_eq!(subjects[0].namespace.as_deref(), Some(NAMESPACE));
    assert!(api
        .get::<RoleBinding>(Some("prod"), "stash-backup-job-pg-backup")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_repeated_rbac_writes_nothing() {
    let api = MemoryClusterApi::new();
    let owner = owner("mysql-backup", "uid-1");
    let psps = ["restricted".to_string()];

    ensure_rbac(
        &api,
        JobKind::VolumeSnapshotJob,
        NAMESPACE,
        "mysql-backup",
        &owner,
        &psps,
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();
    api.clear_writes();
    ensure_rbac(
        &api,
        JobKind::VolumeSnapshotJob,
        NAMESPACE,
        "mysql-backup",
        &owner,
        &psps,
        &labels(),
        RETRIES,
    )
    .await
    .unwrap();

    assert!(api.writes().is_empty());
    let role: ClusterRole = api.get(None, "stash-vs-job").await.unwrap().unwrap();
    assert!(psp_names(&role).is_empty(), "snapshot jobs get no PSP rule");
}

#[tokio::test]
async fn test_job_template_is_fixed_at_creation() {
    let api = MemoryClusterApi::new();
    let owner = owner("mysql-backup", "uid-1");

    let (_, created) = ensure_job(
        &api,
        NAMESPACE,
        "stash-backup-bs-1",
        &labels(),
        &owner,
        template("stash:v0.9.0"),
        RETRIES,
    )
    .await
    .unwrap();
    let (job, again) = ensure_job(
        &api,
        NAMESPACE,
        "stash-backup-bs-1",
        &labels(),
        &owner,
        template("stash:v0.9.1"),
        RETRIES,
    )
    .await
    .unwrap();

    assert_eq!(created, EnsureOutcome::Created);
    assert_eq!(again, EnsureOutcome::Unchanged);
    let image = job.spec.unwrap().template.spec.unwrap().containers[0]
        .image
        .clone();
    assert_eq!(image.as_deref(), Some("stash:v0.9.0"));
    assert_eq!(api.writes_of("Job").len(), 1);

    let stored: Job = api
        .get(Some(NAMESPACE), "stash-backup-bs-1")
        .await
        .unwrap()
        .unwrap();
    let pod_labels = stored.spec.unwrap().template.metadata.unwrap().labels;
    assert_eq!(pod_labels, Some(labels()));
}

#[test]
fn test_role_binding_names() {
    assert_eq!(
        role_binding_name(JobKind::BackupJob, "BackupConfiguration", "mysql.backup"),
        "stash-backup-job-mysql-backup"
    );
    assert_eq!(
        role_binding_name(JobKind::CronJob, "BackupConfiguration", "mysql-backup"),
        "stash-cron-job-mysql-backup"
    );
    assert_eq!(
        role_binding_name(JobKind::Sidecar, "Deployment", "web"),
        "stash-sidecar-deployment-web"
    );
    assert_eq!(sanitize_name("a.b.c"), "a-b-c");
}
