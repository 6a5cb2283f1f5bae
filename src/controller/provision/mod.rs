//! # Resource Provisioner
//!
//! Idempotent create-or-update of the objects a backup job needs.
//!
//! [`ensure`] is the single apply-if-changed primitive: it reads the object,
//! runs a pure `current -> desired` transform and writes only when the result
//! differs. Creation races and stale writes restart the cycle, so shared
//! objects (the cluster-scoped ClusterRoles) converge under concurrent
//! reconcilers without a lock.
//!
//! ## Module Structure
//!
//! - `rbac.rs` - ClusterRole policy tables and RoleBindings per job kind
//! - `workload.rs` - ServiceAccounts and Jobs

mod rbac;
mod workload;

pub use rbac::{
    cluster_role_rules, ensure_cluster_role, ensure_rbac, ensure_role_binding, merge_rules,
    role_binding_name, JobKind,
};
pub use workload::{ensure_job, ensure_service_account};

use crate::constants::DEFAULT_CONFLICT_RETRIES;
use crate::controller::client::{ClusterApi, Managed};
use crate::error::{Error, Result};
use crate::observability::metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// What [`ensure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Patched,
    Unchanged,
}

impl EnsureOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Patched => "patched",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create `namespace/name` from `transform(K::default())` or converge the
/// existing object to `transform(existing)`.
///
/// Retries up to the default number of conflict retries.
pub async fn ensure<K, C, F>(
    api: &C,
    namespace: Option<&str>,
    name: &str,
    transform: F,
) -> Result<(K, EnsureOutcome)>
where
    K: Managed + Default,
    C: ClusterApi,
    F: Fn(K) -> K + Sync,
{
    ensure_with_retries(api, namespace, name, DEFAULT_CONFLICT_RETRIES, transform).await
}

/// [`ensure`] with an explicit bound on conflicting attempts
pub async fn ensure_with_retries<K, C, F>(
    api: &C,
    namespace: Option<&str>,
    name: &str,
    conflict_retries: u32,
    transform: F,
) -> Result<(K, EnsureOutcome)>
where
    K: Managed + Default,
    C: ClusterApi,
    F: Fn(K) -> K + Sync,
{
    let kind = K::kind(&()).to_string();
    let attempts = conflict_retries.max(1);

    for attempt in 1..=attempts {
        let result = match api.get::<K>(namespace, name).await? {
            None => {
                let mut fresh = K::default();
                let meta = fresh.meta_mut();
                meta.name = Some(name.to_string());
                meta.namespace = namespace.map(str::to_string);
                api.create(&transform(fresh))
                    .await
                    .map(|obj| (obj, EnsureOutcome::Created))
            }
            Some(current) => {
                let desired = transform(current.clone());
                if desired == current {
                    return Ok((current, EnsureOutcome::Unchanged));
                }
                api.replace(&desired)
                    .await
                    .map(|obj| (obj, EnsureOutcome::Patched))
            }
        };

        match result {
            Ok((obj, outcome)) => {
                info!(kind = %kind, name, %outcome, "ensured object");
                metrics::increment_provisioned_objects(&kind, outcome.as_str());
                return Ok((obj, outcome));
            }
            Err(e) if e.is_conflict() => {
                debug!(kind = %kind, name, attempt, error = %e, "write raced, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::ConflictRetriesExhausted {
        kind,
        name: name.to_string(),
        attempts,
    })
}

/// Owner reference pointing at `owner`, for cascading deletion
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    let meta = owner.meta();
    let missing = |field: &str| {
        Error::Validation(format!(
            "{} {} has no {field}",
            K::kind(&()),
            meta.name.as_deref().unwrap_or_default()
        ))
    };
    Ok(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: meta.name.clone().ok_or_else(|| missing("name"))?,
        uid: meta.uid.clone().ok_or_else(|| missing("uid"))?,
        block_owner_deletion: Some(true),
        controller: None,
    })
}

/// Insert `owner`, replacing an existing reference with the same UID
pub fn upsert_owner_reference(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
}

/// Add `labels` to the object's labels, keeping any others
pub fn merge_labels(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>) {
    if labels.is_empty() {
        return;
    }
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Object names may not contain dots in the generated positions
pub fn sanitize_name(name: &str) -> String {
    name.replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::MemoryClusterApi;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn with_data(mut cm: ConfigMap, value: &str) -> ConfigMap {
        cm.data = Some(BTreeMap::from([("key".to_string(), value.to_string())]));
        cm
    }

    #[tokio::test]
    async fn test_ensure_creates_then_is_a_no_op() {
        let api = MemoryClusterApi::new();

        let (_, first) = ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "a"))
            .await
            .unwrap();
        let (_, second) = ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "a"))
            .await
            .unwrap();

        assert_eq!(first, EnsureOutcome::Created);
        assert_eq!(second, EnsureOutcome::Unchanged);
        assert_eq!(api.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_patches_on_difference() {
        let api = MemoryClusterApi::new();
        ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "a"))
            .await
            .unwrap();
        let (cm, outcome) = ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "b"))
            .await
            .unwrap();

        assert_eq!(outcome, EnsureOutcome::Patched);
        assert_eq!(cm.data.unwrap().get("key").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn test_ensure_retries_conflicts() {
        let api = MemoryClusterApi::new();
        ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "a"))
            .await
            .unwrap();
        api.conflict_writes("ConfigMap", 2);

        let (_, outcome) = ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "b"))
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::Patched);
    }

    #[tokio::test]
    async fn test_ensure_gives_up_after_bounded_conflicts() {
        let api = MemoryClusterApi::new();
        ensure(&api, Some("demo"), "cfg", |cm: ConfigMap| with_data(cm, "a"))
            .await
            .unwrap();
        api.conflict_writes("ConfigMap", 10);

        let err = ensure_with_retries(&api, Some("demo"), "cfg", 3, |cm: ConfigMap| {
            with_data(cm, "b")
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::ConflictRetriesExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_upsert_owner_reference_by_uid() {
        let owner = OwnerReference {
            api_version: "stash.appscode.com/v1beta1".to_string(),
            kind: "BackupConfiguration".to_string(),
            name: "cfg".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        };
        let other = OwnerReference {
            uid: "uid-2".to_string(),
            ..owner.clone()
        };
        let mut meta = ObjectMeta {
            owner_references: Some(vec![other.clone()]),
            ..Default::default()
        };

        upsert_owner_reference(&mut meta, &owner);
        upsert_owner_reference(&mut meta, &owner);
        assert_eq!(meta.owner_references, Some(vec![other, owner]));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my.app.backup"), "my-app-backup");
    }
}
