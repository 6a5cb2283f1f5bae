//! ClusterRoles and RoleBindings for backup pods.
//!
//! Each job kind has a fixed policy table. The ClusterRole of a kind is a
//! singleton shared by every configuration in the cluster; its rules only
//! grow (desired rules are unioned into what is there). RoleBindings are per
//! owner, bind the owner's ServiceAccount to the shared ClusterRole and are
//! owned by the configuration so they are collected with it.

use super::{
    ensure_with_retries, merge_labels, sanitize_name, upsert_owner_reference, EnsureOutcome,
};
use crate::constants::{LABEL_MANAGED_BY, STASH_GROUP};
use crate::controller::client::ClusterApi;
use crate::error::Result;
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

const APP_CATALOG_GROUP: &str = "appcatalog.appscode.com";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const SNAPSHOT_GROUP: &str = "snapshot.storage.k8s.io";

/// Pod identities Stash provisions RBAC for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    BackupJob,
    CronJob,
    Sidecar,
    VolumeSnapshotJob,
}

impl JobKind {
    pub fn cluster_role_name(self) -> &'static str {
        match self {
            Self::BackupJob => "stash-backup-job",
            Self::CronJob => "stash-cron-job",
            Self::Sidecar => "stash-sidecar",
            Self::VolumeSnapshotJob => "stash-vs-job",
        }
    }
}

/// Name of the RoleBinding of `owner_name`
///
/// Sidecar bindings are per workload, so they also carry the workload kind.
pub fn role_binding_name(kind: JobKind, owner_kind: &str, owner_name: &str) -> String {
    match kind {
        JobKind::Sidecar => format!(
            "{}-{}-{}",
            kind.cluster_role_name(),
            owner_kind.to_lowercase(),
            sanitize_name(owner_name)
        ),
        _ => format!("{}-{}", kind.cluster_role_name(), sanitize_name(owner_name)),
    }
}

struct Rule {
    groups: &'static [&'static str],
    resources: &'static [&'static str],
    verbs: &'static [&'static str],
}

const fn rule(
    groups: &'static [&'static str],
    resources: &'static [&'static str],
    verbs: &'static [&'static str],
) -> Rule {
    Rule {
        groups,
        resources,
        verbs,
    }
}

const BACKUP_JOB_RULES: &[Rule] = &[
    rule(&[STASH_GROUP], &["*"], &["*"]),
    rule(&[APP_CATALOG_GROUP], &["appbindings"], &["get"]),
    rule(&[""], &["secrets"], &["get"]),
    rule(&[""], &["events"], &["create"]),
];

const CRON_JOB_RULES: &[Rule] = &[
    rule(&[STASH_GROUP], &["backupsessions"], &["*"]),
    rule(&[STASH_GROUP], &["backupconfigurations"], &["*"]),
    rule(&[""], &["events"], &["create"]),
    rule(
        &["apps"],
        &["deployments", "statefulsets", "replicasets", "daemonsets"],
        &["get"],
    ),
    rule(
        &[""],
        &["replicationcontrollers", "persistentvolumeclaims"],
        &["get"],
    ),
    rule(&["apps.openshift.io"], &["deploymentconfigs"], &["get"]),
    rule(&[APP_CATALOG_GROUP], &["*"], &["get"]),
];

const SIDECAR_RULES: &[Rule] = &[
    rule(&[STASH_GROUP], &["*"], &["*"]),
    rule(&["apps"], &["deployments", "statefulsets"], &["get", "list", "patch"]),
    rule(&["apps"], &["daemonsets", "replicasets"], &["get", "list", "patch"]),
    rule(&[""], &["replicationcontrollers"], &["get", "list", "patch"]),
    rule(&[""], &["secrets"], &["get"]),
    rule(&[""], &["configmaps"], &["create", "update", "get"]),
    rule(&[""], &["events"], &["create"]),
    rule(&["batch"], &["jobs"], &["create", "get"]),
    rule(
        &[RBAC_GROUP],
        &["clusterroles", "roles", "rolebindings"],
        &["get", "create"],
    ),
    rule(&[""], &["serviceaccounts"], &["get", "create"]),
];

const VOLUME_SNAPSHOT_JOB_RULES: &[Rule] = &[
    rule(&[STASH_GROUP], &["*"], &["*"]),
    rule(
        &["apps"],
        &["deployments", "statefulsets", "replicasets", "daemonsets"],
        &["get", "list"],
    ),
    rule(
        &[""],
        &["replicationcontrollers", "persistentvolumeclaims"],
        &["get", "list"],
    ),
    rule(&[SNAPSHOT_GROUP], &["volumesnapshots"], &["create", "get", "list"]),
    rule(&[SNAPSHOT_GROUP], &["volumesnapshotclasses"], &["get"]),
    rule(&[""], &["events"], &["create"]),
];

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Desired rules of `kind`
///
/// Kinds whose pods run user-supplied functions get a `use` rule on the
/// named PodSecurityPolicies; with no names there is no such rule.
pub fn cluster_role_rules(kind: JobKind, psps: &[String]) -> Vec<PolicyRule> {
    let (table, psp_rule) = match kind {
        JobKind::BackupJob => (BACKUP_JOB_RULES, true),
        JobKind::CronJob => (CRON_JOB_RULES, true),
        JobKind::Sidecar => (SIDECAR_RULES, false),
        JobKind::VolumeSnapshotJob => (VOLUME_SNAPSHOT_JOB_RULES, false),
    };

    let mut rules: Vec<PolicyRule> = table
        .iter()
        .map(|r| PolicyRule {
            api_groups: Some(to_strings(r.groups)),
            resources: Some(to_strings(r.resources)),
            verbs: to_strings(r.verbs),
            ..Default::default()
        })
        .collect();
    if psp_rule && !psps.is_empty() {
        let mut names = psps.to_vec();
        names.sort();
        names.dedup();
        rules.push(PolicyRule {
            api_groups: Some(vec!["policy".to_string()]),
            resources: Some(vec!["podsecuritypolicies".to_string()]),
            verbs: vec!["use".to_string()],
            resource_names: Some(names),
            ..Default::default()
        });
    }
    rules
}

fn same_target(a: &PolicyRule, b: &PolicyRule) -> bool {
    a.api_groups == b.api_groups
        && a.resources == b.resources
        && a.verbs == b.verbs
        && a.non_resource_urls == b.non_resource_urls
}

/// Union `desired` into `existing`
///
/// A desired rule matching an existing rule's groups, resources and verbs
/// adds its resource names to it; otherwise it is appended. Existing rules
/// are never removed or narrowed.
pub fn merge_rules(mut existing: Vec<PolicyRule>, desired: &[PolicyRule]) -> Vec<PolicyRule> {
    for want in desired {
        match existing.iter_mut().find(|have| same_target(have, want)) {
            Some(have) => {
                let Some(wanted_names) = want.resource_names.as_ref().filter(|n| !n.is_empty())
                else {
                    continue;
                };
                // an existing rule without names already covers every name
                if let Some(names) = have.resource_names.as_mut().filter(|n| !n.is_empty()) {
                    for name in wanted_names {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                    names.sort();
                }
            }
            None => existing.push(want.clone()),
        }
    }
    existing
}

/// Ensure the shared ClusterRole of `kind` grants at least its policy table
pub async fn ensure_cluster_role<C: ClusterApi>(
    api: &C,
    kind: JobKind,
    psps: &[String],
    conflict_retries: u32,
) -> Result<EnsureOutcome> {
    let desired = cluster_role_rules(kind, psps);
    let labels = BTreeMap::from([(LABEL_MANAGED_BY.to_string(), STASH_GROUP.to_string())]);
    let (_, outcome) = ensure_with_retries(
        api,
        None,
        kind.cluster_role_name(),
        conflict_retries,
        |mut role: ClusterRole| {
            merge_labels(&mut role.metadata, &labels);
            role.rules = Some(merge_rules(role.rules.take().unwrap_or_default(), &desired));
            role
        },
    )
    .await?;
    Ok(outcome)
}

/// Ensure the RoleBinding giving `service_account` the ClusterRole of `kind`
#[allow(clippy::too_many_arguments, reason = "mirrors the fields of the RoleBinding")]
pub async fn ensure_role_binding<C: ClusterApi>(
    api: &C,
    kind: JobKind,
    namespace: &str,
    name: &str,
    service_account: &str,
    owner: &OwnerReference,
    labels: &BTreeMap<String, String>,
    conflict_retries: u32,
) -> Result<EnsureOutcome> {
    let (_, outcome) = ensure_with_retries(
        api,
        Some(namespace),
        name,
        conflict_retries,
        |mut binding: RoleBinding| {
            upsert_owner_reference(&mut binding.metadata, owner);
            merge_labels(&mut binding.metadata, labels);
            binding.role_ref = RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: kind.cluster_role_name().to_string(),
            };
            binding.subjects = Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: service_account.to_string(),
                namespace: Some(namespace.to_string()),
                api_group: None,
            }]);
            binding
        },
    )
    .await?;
    Ok(outcome)
}

/// ClusterRole plus RoleBinding for one owner
///
/// The binding is named after `owner` (see [`role_binding_name`]) and lives
/// in `namespace`.
#[allow(clippy::too_many_arguments, reason = "one value per RBAC input")]
pub async fn ensure_rbac<C: ClusterApi>(
    api: &C,
    kind: JobKind,
    namespace: &str,
    service_account: &str,
    owner: &OwnerReference,
    psps: &[String],
    labels: &BTreeMap<String, String>,
    conflict_retries: u32,
) -> Result<()> {
    ensure_cluster_role(api, kind, psps, conflict_retries).await?;
    let name = role_binding_name(kind, &owner.kind, &owner.name);
    ensure_role_binding(
        api,
        kind,
        namespace,
        &name,
        service_account,
        owner,
        labels,
        conflict_retries,
    )
    .await?;
    Ok(())
}
