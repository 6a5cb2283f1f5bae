//! # Job Templates
//!
//! Pod templates the controller builds itself: the volume-snapshot job, and
//! the local-backend volume attached to resolved backup pods.

use crate::constants::LOCAL_BACKEND_VOLUME;
use crate::crd::{BackupConfiguration, BackupSession, LocalSpec};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec, VolumeMount,
};
use kube::ResourceExt;
use std::fmt;

/// Container image reference `registry/image:tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub image: String,
    pub tag: String,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.image, self.tag)
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: path.to_string(),
            }),
            ..Default::default()
        }),
    }
}

/// Pod template of the job that takes volume snapshots for `session`
///
/// The pod runs one `stash create-vs` container. Runtime settings of the
/// configuration are applied; the ServiceAccount is set by the caller.
pub fn volume_snapshot_job_template(
    session: &BackupSession,
    configuration: &BackupConfiguration,
    image: &ImageRef,
) -> Result<PodTemplateSpec> {
    let target = configuration.spec.target.as_ref().ok_or_else(|| {
        Error::JobTemplate(format!(
            "BackupConfiguration {}/{} has no target",
            configuration.namespace().unwrap_or_default(),
            configuration.name_any()
        ))
    })?;
    if target.target_ref.kind.is_empty() || target.target_ref.name.is_empty() {
        return Err(Error::JobTemplate(format!(
            "target of BackupConfiguration {} must name a kind and an object",
            configuration.name_any()
        )));
    }

    let container = Container {
        name: "stash".to_string(),
        image: Some(image.to_string()),
        args: Some(vec![
            "create-vs".to_string(),
            format!("--backupsession={}", session.name_any()),
            format!("--namespace={}", session.namespace().unwrap_or_default()),
            format!("--target-kind={}", target.target_ref.kind),
            format!("--target-name={}", target.target_ref.name),
            "--metrics-enabled=true".to_string(),
            "--enable-status-subresource=true".to_string(),
        ]),
        env: Some(vec![
            field_env("NODE_NAME", "spec.nodeName"),
            field_env("POD_NAME", "metadata.name"),
        ]),
        ..Default::default()
    };

    let mut pod_spec = PodSpec {
        containers: vec![container],
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    };
    configuration.runtime_settings().apply(&mut pod_spec);

    Ok(PodTemplateSpec {
        metadata: None,
        spec: Some(pod_spec),
    })
}

/// Mount a local repository backend into every container of `pod_spec`
pub fn attach_local_backend(pod_spec: &mut PodSpec, local: &LocalSpec) {
    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    volumes.retain(|v| v.name != LOCAL_BACKEND_VOLUME);
    volumes.push(local.volume_source.to_volume(LOCAL_BACKEND_VOLUME));

    let mount = VolumeMount {
        name: LOCAL_BACKEND_VOLUME.to_string(),
        mount_path: local.mount_path.clone(),
        sub_path: local.sub_path.clone(),
        ..Default::default()
    };
    let all = pod_spec
        .containers
        .iter_mut()
        .chain(pod_spec.init_containers.iter_mut().flatten());
    for container in all {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        mounts.retain(|m| m.name != LOCAL_BACKEND_VOLUME);
        mounts.push(mount.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        BackupConfigurationSpec, BackupSessionSpec, BackupTarget, HostPathVolume, LocalObjectRef,
        TargetRef, VolumeSource,
    };

    fn image() -> ImageRef {
        ImageRef {
            registry: "appscode".to_string(),
            image: "stash".to_string(),
            tag: "v0.9.0".to_string(),
        }
    }

    fn session() -> BackupSession {
        let mut session = BackupSession::new(
            "daily.1",
            BackupSessionSpec {
                backup_configuration: LocalObjectRef {
                    name: "daily".to_string(),
                },
            },
        );
        session.metadata.namespace = Some("demo".to_string());
        session
    }

    #[test]
    fn test_volume_snapshot_template() {
        let configuration = BackupConfiguration::new(
            "daily",
            BackupConfigurationSpec {
                target: Some(BackupTarget {
                    target_ref: TargetRef {
                        kind: "StatefulSet".to_string(),
                        name: "db".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let template = volume_snapshot_job_template(&session(), &configuration, &image()).unwrap();
        let pod = template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("appscode/stash:v0.9.0"));
        let args = container.args.clone().unwrap_or_default();
        assert_eq!(args[0], "create-vs");
        assert!(args.contains(&"--backupsession=daily.1".to_string()));
        assert!(args.contains(&"--namespace=demo".to_string()));
    }

    #[test]
    fn test_volume_snapshot_template_needs_target() {
        let configuration = BackupConfiguration::new("daily", BackupConfigurationSpec::default());
        let err = volume_snapshot_job_template(&session(), &configuration, &image()).unwrap_err();
        assert!(matches!(err, Error::JobTemplate(_)));
    }

    #[test]
    fn test_attach_local_backend_mounts_every_container() {
        let mut pod = PodSpec {
            containers: vec![Container {
                name: "backup".to_string(),
                ..Default::default()
            }],
            init_containers: Some(vec![Container {
                name: "pre".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let local = LocalSpec {
            mount_path: "/safe/data".to_string(),
            sub_path: None,
            volume_source: VolumeSource {
                host_path: Some(HostPathVolume {
                    path: "/data/stash".to_string(),
                }),
                ..Default::default()
            },
        };

        attach_local_backend(&mut pod, &local);
        attach_local_backend(&mut pod, &local);

        assert_eq!(pod.volumes.as_ref().map(Vec::len), Some(1));
        for c in pod.containers.iter().chain(pod.init_containers.iter().flatten()) {
            let mounts = c.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts.len(), 1);
            assert_eq!(mounts[0].mount_path, "/safe/data");
        }
    }
}
