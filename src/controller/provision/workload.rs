//! ServiceAccounts and Jobs owned by a backup configuration.

use super::{ensure_with_retries, merge_labels, upsert_owner_reference, EnsureOutcome};
use crate::controller::client::ClusterApi;
use crate::error::Result;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

/// Ensure `namespace/name` exists and carries `owner` and `labels`
pub async fn ensure_service_account<C: ClusterApi>(
    api: &C,
    namespace: &str,
    name: &str,
    owner: &OwnerReference,
    labels: &BTreeMap<String, String>,
    conflict_retries: u32,
) -> Result<EnsureOutcome> {
    let (_, outcome) = ensure_with_retries(
        api,
        Some(namespace),
        name,
        conflict_retries,
        |mut sa: ServiceAccount| {
            upsert_owner_reference(&mut sa.metadata, owner);
            merge_labels(&mut sa.metadata, labels);
            sa
        },
    )
    .await?;
    Ok(outcome)
}

/// Ensure the Job `namespace/name` exists
///
/// The pod template of a Job is immutable once created, so `template` is
/// only used on creation. An existing Job just converges its labels and
/// owner reference.
pub async fn ensure_job<C: ClusterApi>(
    api: &C,
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
    owner: &OwnerReference,
    template: PodTemplateSpec,
    conflict_retries: u32,
) -> Result<(Job, EnsureOutcome)> {
    ensure_with_retries(
        api,
        Some(namespace),
        name,
        conflict_retries,
        |mut job: Job| {
            upsert_owner_reference(&mut job.metadata, owner);
            merge_labels(&mut job.metadata, labels);
            if job.spec.is_none() {
                let mut template = template.clone();
                let pod_meta = template.metadata.get_or_insert_with(Default::default);
                merge_labels(pod_meta, labels);
                job.spec = Some(JobSpec {
                    template,
                    ..Default::default()
                });
            }
            job
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::{MemoryClusterApi, WriteVerb};
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "stash.appscode.com/v1beta1".to_string(),
            kind: "BackupConfiguration".to_string(),
            name: "cfg".to_string(),
            uid: "uid-cfg".to_string(),
            block_owner_deletion: Some(true),
            controller: None,
        }
    }

    fn template(image: &str) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "stash".to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn image_of(job: &Job) -> Option<String> {
        job.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone())
    }

    #[tokio::test]
    async fn test_job_template_is_fixed_at_creation() {
        let api = MemoryClusterApi::new();
        let labels = BTreeMap::from([("app".to_string(), "stash".to_string())]);

        let (job, created) = ensure_job(&api, "demo", "stash-backup-s1", &labels, &owner(), template("v1"), 5)
            .await
            .unwrap();
        assert_eq!(created, EnsureOutcome::Created);
        assert_eq!(image_of(&job).as_deref(), Some("v1"));

        let (job, again) = ensure_job(&api, "demo", "stash-backup-s1", &labels, &owner(), template("v2"), 5)
            .await
            .unwrap();
        assert_eq!(again, EnsureOutcome::Unchanged);
        assert_eq!(image_of(&job).as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_service_account_gains_owner_once() {
        let api = MemoryClusterApi::new();
        let labels = BTreeMap::new();

        for _ in 0..3 {
            ensure_service_account(&api, "demo", "cfg", &owner(), &labels, 5)
                .await
                .unwrap();
        }

        let writes = api.writes_of("ServiceAccount");
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].verb, WriteVerb::Create);

        let sa: ServiceAccount = api.get(Some("demo"), "cfg").await.unwrap().unwrap();
        assert_eq!(sa.metadata.owner_references.map(|r| r.len()), Some(1));
    }
}
