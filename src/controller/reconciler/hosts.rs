//! Number of hosts a BackupSession waits for.

use crate::controller::client::{ClusterApi, Managed};
use crate::crd::{BackupConfiguration, BackupTarget, Snapshotter};
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec, ReplicationController};
use kube::ResourceExt;
use tracing::debug;

/// Hosts expected to report for sessions of `configuration`
///
/// With a target selector the counts of every matching object are summed;
/// an unset target is a single host.
pub async fn total_hosts<C: ClusterApi>(
    api: &C,
    configuration: &BackupConfiguration,
) -> Result<i32> {
    let Some(target) = configuration.spec.target.as_ref() else {
        return Ok(1);
    };
    let namespace = configuration.namespace().unwrap_or_default();
    let kind = target.target_ref.kind.as_str();

    match configuration.spec.driver {
        Snapshotter::Restic => match kind {
            "StatefulSet" => {
                sum_over(api, &namespace, target, |ss: &StatefulSet| {
                    ss.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
                })
                .await
            }
            "DaemonSet" => {
                sum_over(api, &namespace, target, |ds: &DaemonSet| {
                    ds.status
                        .as_ref()
                        .map_or(0, |s| s.desired_number_scheduled)
                })
                .await
            }
            _ => single_or_selected(api, &namespace, target).await,
        },
        Snapshotter::VolumeSnapshotter => match kind {
            "StatefulSet" => {
                sum_over(api, &namespace, target, |ss: &StatefulSet| {
                    let spec = ss.spec.as_ref();
                    let replicas = target
                        .replicas
                        .or_else(|| spec.and_then(|s| s.replicas))
                        .unwrap_or(1);
                    let claims = spec
                        .and_then(|s| s.volume_claim_templates.as_ref())
                        .map_or(0, Vec::len);
                    replicas.saturating_mul(count(claims))
                })
                .await
            }
            "Deployment" => {
                sum_over(api, &namespace, target, |d: &Deployment| {
                    claim_volumes(d.spec.as_ref().map(|s| &s.template))
                })
                .await
            }
            "DaemonSet" => {
                sum_over(api, &namespace, target, |d: &DaemonSet| {
                    claim_volumes(d.spec.as_ref().map(|s| &s.template))
                })
                .await
            }
            "ReplicaSet" => {
                sum_over(api, &namespace, target, |r: &ReplicaSet| {
                    claim_volumes(r.spec.as_ref().and_then(|s| s.template.as_ref()))
                })
                .await
            }
            "ReplicationController" => {
                sum_over(api, &namespace, target, |r: &ReplicationController| {
                    claim_volumes(r.spec.as_ref().and_then(|s| s.template.as_ref()))
                })
                .await
            }
            _ => single_or_selected(api, &namespace, target).await,
        },
    }
}

/// One host per addressed object of a kind without per-object hosts
async fn single_or_selected<C: ClusterApi>(
    api: &C,
    namespace: &str,
    target: &BackupTarget,
) -> Result<i32> {
    if target.selector.is_none() {
        return Ok(1);
    }
    match target.target_ref.kind.as_str() {
        "Deployment" => sum_over(api, namespace, target, |_: &Deployment| 1).await,
        "ReplicaSet" => sum_over(api, namespace, target, |_: &ReplicaSet| 1).await,
        "ReplicationController" => {
            sum_over(api, namespace, target, |_: &ReplicationController| 1).await
        }
        "PersistentVolumeClaim" => {
            sum_over(api, namespace, target, |_: &PersistentVolumeClaim| 1).await
        }
        kind => {
            debug!(kind, "selector over an unlisted kind counts as one host");
            Ok(1)
        }
    }
}

/// Sum `hosts` over the target object, or over every object the selector matches
async fn sum_over<K, C, F>(
    api: &C,
    namespace: &str,
    target: &BackupTarget,
    hosts: F,
) -> Result<i32>
where
    K: Managed,
    C: ClusterApi,
    F: Fn(&K) -> i32,
{
    if let Some(selector) = target.selector.as_deref() {
        let objects: Vec<K> = api.list(Some(namespace), Some(selector)).await?;
        return Ok(objects.iter().map(&hosts).fold(0, i32::saturating_add));
    }

    let name = &target.target_ref.name;
    let object: K = api.get(Some(namespace), name).await?.ok_or_else(|| {
        Error::not_found(target.target_ref.kind.clone(), format!("{namespace}/{name}"))
    })?;
    Ok(hosts(&object))
}

/// PVC-backed volumes of a pod template
fn claim_volumes(template: Option<&PodTemplateSpec>) -> i32 {
    let volumes = template
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| s.volumes.as_ref())
        .map_or(0, |volumes| {
            volumes
                .iter()
                .filter(|v| v.persistent_volume_claim.is_some())
                .count()
        });
    count(volumes)
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
