//! Provisioning of the jobs that take a backup.

use super::{implicit_inputs, merge_inputs, Reconciler};
use crate::constants::{
    BACKUP_JOB_PREFIX, LABEL_DELETE_JOB_ON_COMPLETION, VOLUME_SNAPSHOT_JOB_PREFIX,
};
use crate::controller::client::ClusterApi;
use crate::controller::job_template::{attach_local_backend, volume_snapshot_job_template};
use crate::controller::provision::{
    ensure_job, ensure_rbac, ensure_service_account, owner_reference, sanitize_name, JobKind,
};
use crate::controller::task::TaskRequest;
use crate::crd::{BackupConfiguration, BackupSession, Repository};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub fn backup_job_name(session: &BackupSession) -> String {
    sanitize_name(&format!("{BACKUP_JOB_PREFIX}{}", session.name_any()))
}

pub fn volume_snapshot_job_name(session: &BackupSession) -> String {
    sanitize_name(&format!("{VOLUME_SNAPSHOT_JOB_PREFIX}{}", session.name_any()))
}

fn job_labels(
    configuration: &BackupConfiguration,
    delete_on_completion: bool,
) -> BTreeMap<String, String> {
    let mut labels = configuration.offshoot_labels();
    labels.insert(
        LABEL_DELETE_JOB_ON_COMPLETION.to_string(),
        delete_on_completion.to_string(),
    );
    labels
}

impl<C: ClusterApi> Reconciler<C> {
    /// ServiceAccount, RBAC and the restic backup Job of `session`
    pub(super) async fn ensure_backup_job(
        &self,
        session: &BackupSession,
        configuration: &BackupConfiguration,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let namespace = configuration.namespace().unwrap_or_default();
        let labels = configuration.offshoot_labels();
        let owner = owner_reference(configuration)?;
        let runtime_settings = configuration.runtime_settings();
        let retries = self.settings.conflict_retries;

        let service_account = match runtime_settings.service_account_name() {
            Some(name) => name.to_string(),
            None => {
                let name = sanitize_name(&configuration.name_any());
                ensure_service_account(api, &namespace, &name, &owner, &labels, retries).await?;
                name
            }
        };

        let task_name = &configuration.spec.task.name;
        let psps = self.tasks.pod_security_policies(task_name).await?;
        ensure_rbac(
            api,
            JobKind::BackupJob,
            &namespace,
            &service_account,
            &owner,
            &psps,
            &labels,
            retries,
        )
        .await?;

        let repository_name = &configuration.spec.repository.name;
        let repository: Repository = api
            .get(Some(&namespace), repository_name)
            .await?
            .ok_or_else(|| {
                Error::not_found("Repository", format!("{namespace}/{repository_name}"))
            })?;

        let implicit = implicit_inputs(
            session,
            configuration,
            &repository,
            self.settings.enable_status_subresource,
        )?;
        let request = TaskRequest {
            task_name: task_name.clone(),
            inputs: merge_inputs(&configuration.spec.task.params, implicit),
            runtime_settings,
            temp_dir: configuration.spec.temp_dir.clone().unwrap_or_default(),
        };
        let mut pod_spec = self.tasks.resolve(&request).await.map_err(|e| match e {
            Error::TaskResolution(reason) => Error::TaskResolution(format!(
                "can't get PodSpec for BackupConfiguration {namespace}/{}, reason: {reason}",
                configuration.name_any()
            )),
            other => other,
        })?;

        if let Some(local) = &repository.spec.backend.local {
            debug!(mount_path = %local.mount_path, "mounting local backend");
            attach_local_backend(&mut pod_spec, local);
        }
        pod_spec.service_account_name = Some(service_account);

        let name = backup_job_name(session);
        let (_, outcome) = ensure_job(
            api,
            &namespace,
            &name,
            &job_labels(configuration, false),
            &owner,
            PodTemplateSpec {
                metadata: None,
                spec: Some(pod_spec),
            },
            retries,
        )
        .await?;
        info!(job = %name, outcome = outcome.as_str(), "backup job ensured");
        Ok(())
    }

    /// ServiceAccount, RBAC and the volume-snapshot Job of `session`
    pub(super) async fn ensure_volume_snapshot_job(
        &self,
        session: &BackupSession,
        configuration: &BackupConfiguration,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let namespace = configuration.namespace().unwrap_or_default();
        let labels = configuration.offshoot_labels();
        let owner = owner_reference(configuration)?;
        let retries = self.settings.conflict_retries;

        let service_account = configuration.name_any();
        ensure_service_account(api, &namespace, &service_account, &owner, &labels, retries)
            .await?;

        ensure_rbac(
            api,
            JobKind::VolumeSnapshotJob,
            &namespace,
            &service_account,
            &owner,
            &[],
            &labels,
            retries,
        )
        .await?;

        let mut template =
            volume_snapshot_job_template(session, configuration, &self.settings.image)?;
        if let Some(spec) = template.spec.as_mut() {
            spec.service_account_name = Some(service_account);
        }

        let name = volume_snapshot_job_name(session);
        let (_, outcome) = ensure_job(
            api,
            &namespace,
            &name,
            &job_labels(configuration, true),
            &owner,
            template,
            retries,
        )
        .await?;
        info!(job = %name, outcome = outcome.as_str(), "volume snapshot job ensured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupSessionSpec, LocalObjectRef};

    #[test]
    fn test_job_names() {
        let session = BackupSession::new(
            "sample.backup-1561974001",
            BackupSessionSpec {
                backup_configuration: LocalObjectRef {
                    name: "sample".to_string(),
                },
            },
        );
        assert_eq!(backup_job_name(&session), "stash-backup-sample-backup-1561974001");
        assert_eq!(
            volume_snapshot_job_name(&session),
            "volume-snapshot-sample-backup-1561974001"
        );
    }
}
