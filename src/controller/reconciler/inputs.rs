//! Inputs the controller hands to task resolution.

use crate::crd::{BackupConfiguration, BackupSession, Param, Repository, RetentionPolicy};
use crate::error::{Error, Result};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Host name recorded by the single host of a job-model backup
const JOB_HOSTNAME: &str = "host-0";

/// Inputs derived from the session, its configuration and repository
///
/// Values the objects leave unset are omitted so that `${NAME:=default}`
/// placeholders fall back to their defaults.
pub fn implicit_inputs(
    session: &BackupSession,
    configuration: &BackupConfiguration,
    repository: &Repository,
    enable_status_subresource: bool,
) -> Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            inputs.insert(key.to_string(), value);
        }
    };

    put("NAMESPACE", session.namespace());
    put("BACKUP_SESSION", Some(session.name_any()));
    put(
        "ENABLE_STATUS_SUBRESOURCE",
        Some(enable_status_subresource.to_string()),
    );

    let backend = &repository.spec.backend;
    let provider = backend.provider().ok_or_else(|| {
        Error::TaskResolution(format!(
            "cannot resolve implicit inputs for Repository {}/{}: no backend configured",
            repository.namespace().unwrap_or_default(),
            repository.name_any()
        ))
    })?;
    put("REPOSITORY_NAME", Some(repository.name_any()));
    put("REPOSITORY_PROVIDER", Some(provider.to_string()));
    put(
        "REPOSITORY_SECRET_NAME",
        backend.storage_secret_name.clone(),
    );
    put("REPOSITORY_BUCKET", backend.bucket().map(str::to_string));
    put("REPOSITORY_PREFIX", backend.prefix().map(str::to_string));
    put("REPOSITORY_ENDPOINT", backend.endpoint().map(str::to_string));
    put("REPOSITORY_URL", backend.url().map(str::to_string));

    if let Some(target) = &configuration.spec.target {
        put("TARGET_KIND", Some(target.target_ref.kind.clone()));
        put("TARGET_NAME", Some(target.target_ref.name.clone()));
        put("TARGET_DIRECTORIES", Some(target.paths.join(",")));
        put(
            "TARGET_MOUNT_PATH",
            target.volume_mounts.first().map(|m| m.mount_path.clone()),
        );
    }

    if let Some(policy) = &configuration.spec.retention_policy {
        for (key, value) in retention_inputs(policy) {
            put(key, value);
        }
    }

    put("HOSTNAME", Some(JOB_HOSTNAME.to_string()));
    Ok(inputs)
}

fn retention_inputs(policy: &RetentionPolicy) -> [(&'static str, Option<String>); 10] {
    let number = |n: Option<i64>| n.map(|n| n.to_string());
    [
        ("RETENTION_POLICY_NAME", Some(policy.name.clone())),
        ("RETENTION_KEEP_LAST", number(policy.keep_last)),
        ("RETENTION_KEEP_HOURLY", number(policy.keep_hourly)),
        ("RETENTION_KEEP_DAILY", number(policy.keep_daily)),
        ("RETENTION_KEEP_WEEKLY", number(policy.keep_weekly)),
        ("RETENTION_KEEP_MONTHLY", number(policy.keep_monthly)),
        ("RETENTION_KEEP_YEARLY", number(policy.keep_yearly)),
        ("RETENTION_KEEP_TAGS", Some(policy.keep_tags.join(","))),
        ("RETENTION_PRUNE", Some(policy.prune.to_string())),
        ("RETENTION_DRY_RUN", Some(policy.dry_run.to_string())),
    ]
}

/// Explicit task params layered over the implicit inputs
pub fn merge_inputs(
    explicit: &[Param],
    mut implicit: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    for param in explicit {
        implicit.insert(param.name.clone(), param.value.clone());
    }
    implicit
}
