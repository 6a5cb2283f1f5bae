//! Types shared by several Stash resources.

use k8s_openapi::api::core::v1 as core;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to an object in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectRef {
    pub name: String,
}

/// Name/value parameter passed to a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// Task to run together with its explicit parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// The object a backup or restore acts on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

/// Volume of the target mounted into the backup container
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetVolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl TargetVolumeMount {
    pub fn to_volume_mount(&self) -> core::VolumeMount {
        core::VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            sub_path: self.sub_path.clone(),
            read_only: self.read_only.then_some(true),
            ..Default::default()
        }
    }
}

/// Outcome recorded by a single host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum HostPhase {
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl HostPhase {
    /// Phase of a host that reported `error`
    pub fn from_error(error: Option<&str>) -> Self {
        if error.is_some_and(|e| !e.is_empty()) {
            Self::Failed
        } else {
            Self::Succeeded
        }
    }
}

/// Settings of the emptyDir scratch volume given to task pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

impl EmptyDirSettings {
    pub fn to_volume_source(&self) -> core::EmptyDirVolumeSource {
        core::EmptyDirVolumeSource {
            medium: self.medium.clone(),
            size_limit: self
                .size_limit
                .clone()
                .map(k8s_openapi::apimachinery::pkg::api::resource::Quantity),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostPathVolume {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVolume {
    pub claim_name: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NfsVolume {
    pub server: String,
    pub path: String,
}

/// Subset of volume sources Stash attaches to job pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSettings>,
}

impl VolumeSource {
    /// Build a pod volume with the given name from this source
    pub fn to_volume(&self, name: &str) -> core::Volume {
        core::Volume {
            name: name.to_string(),
            host_path: self.host_path.as_ref().map(|h| core::HostPathVolumeSource {
                path: h.path.clone(),
                type_: None,
            }),
            persistent_volume_claim: self.persistent_volume_claim.as_ref().map(|c| {
                core::PersistentVolumeClaimVolumeSource {
                    claim_name: c.claim_name.clone(),
                    read_only: c.read_only.then_some(true),
                }
            }),
            nfs: self.nfs.as_ref().map(|n| core::NFSVolumeSource {
                server: n.server.clone(),
                path: n.path.clone(),
                read_only: None,
            }),
            empty_dir: self.empty_dir.as_ref().map(EmptyDirSettings::to_volume_source),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirementsSpec {
    pub fn to_resource_requirements(&self) -> core::ResourceRequirements {
        let quantities = |m: &BTreeMap<String, String>| {
            (!m.is_empty()).then(|| {
                m.iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            k8s_openapi::apimachinery::pkg::api::resource::Quantity(v.clone()),
                        )
                    })
                    .collect()
            })
        };
        core::ResourceRequirements {
            limits: quantities(&self.limits),
            requests: quantities(&self.requests),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TolerationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Pod-level overrides for generated job pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodRuntimeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<TolerationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

/// Container-level overrides for generated job pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodRuntimeSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerRuntimeSettings>,
}

impl RuntimeSettings {
    /// Explicit ServiceAccount requested by the user, if any
    pub fn service_account_name(&self) -> Option<&str> {
        self.pod
            .as_ref()
            .and_then(|p| p.service_account_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Apply pod and container overrides to a pod spec
    pub fn apply(&self, pod_spec: &mut core::PodSpec) {
        if let Some(pod) = &self.pod {
            if !pod.node_selector.is_empty() {
                pod_spec.node_selector = Some(pod.node_selector.clone());
            }
            if !pod.tolerations.is_empty() {
                pod_spec.tolerations = Some(
                    pod.tolerations
                        .iter()
                        .map(|t| core::Toleration {
                            key: t.key.clone(),
                            operator: t.operator.clone(),
                            value: t.value.clone(),
                            effect: t.effect.clone(),
                            toleration_seconds: None,
                        })
                        .collect(),
                );
            }
            if pod.priority_class_name.is_some() {
                pod_spec.priority_class_name = pod.priority_class_name.clone();
            }
            if pod.run_as_user.is_some() || pod.fs_group.is_some() {
                let ctx = pod_spec.security_context.get_or_insert_with(Default::default);
                ctx.run_as_user = pod.run_as_user.or(ctx.run_as_user);
                ctx.fs_group = pod.fs_group.or(ctx.fs_group);
            }
        }

        if let Some(container) = &self.container {
            let all = pod_spec
                .containers
                .iter_mut()
                .chain(pod_spec.init_containers.iter_mut().flatten());
            for c in all {
                if let Some(resources) = &container.resources {
                    c.resources = Some(resources.to_resource_requirements());
                }
                if !container.env.is_empty() {
                    let env = c.env.get_or_insert_with(Vec::new);
                    for var in &container.env {
                        env.retain(|e| e.name != var.name);
                        env.push(core::EnvVar {
                            name: var.name.clone(),
                            value: Some(var.value.clone()),
                            value_from: None,
                        });
                    }
                }
                if let Some(uid) = container.run_as_user {
                    c.security_context
                        .get_or_insert_with(Default::default)
                        .run_as_user = Some(uid);
                }
            }
        }
    }
}
