//! # Task Resolution
//!
//! Expands a [`Task`] and its [`Function`]s into the pod spec of a backup
//! job.
//!
//! Every string in a function (image, command, args, mount paths) and in the
//! task's volumes may reference inputs as `${NAME}` or `${NAME:=default}`.
//! Step params are merged under the caller's inputs, so inputs computed by
//! the controller and explicit task params win over a function's own
//! defaults. A reference that resolves to nothing fails the resolution.

use crate::constants::{TMP_DIR_MOUNT_PATH, TMP_DIR_VOLUME};
use crate::controller::client::ClusterApi;
use crate::crd::{EmptyDirSettings, Function, FunctionSpec, RuntimeSettings, Task, TaskVolume};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, PodSpec, Volume, VolumeMount};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use tracing::debug;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::=(?P<default>[^}]*))?\}")
        .expect("variable regex is valid")
});

/// Everything needed to resolve one task
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub task_name: String,
    pub inputs: BTreeMap<String, String>,
    pub runtime_settings: RuntimeSettings,
    pub temp_dir: EmptyDirSettings,
}

#[async_trait]
pub trait TaskResolver: Send + Sync {
    /// Pod spec running the task's steps in order
    async fn resolve(&self, request: &TaskRequest) -> Result<PodSpec>;

    /// PodSecurityPolicies the task's functions need
    async fn pod_security_policies(&self, task_name: &str) -> Result<Vec<String>>;
}

/// Resolves tasks from the Task and Function objects in the cluster
#[derive(Debug)]
pub struct CrdTaskResolver<C> {
    api: Arc<C>,
}

impl<C: ClusterApi> CrdTaskResolver<C> {
    pub fn new(api: Arc<C>) -> Self {
        Self { api }
    }

    async fn task(&self, name: &str) -> Result<Task> {
        if name.is_empty() {
            return Err(Error::TaskResolution("no task specified".to_string()));
        }
        self.api
            .get::<Task>(None, name)
            .await?
            .ok_or_else(|| Error::TaskResolution(format!("Task {name} not found")))
    }

    async fn function(&self, name: &str) -> Result<Function> {
        self.api
            .get::<Function>(None, name)
            .await?
            .ok_or_else(|| Error::TaskResolution(format!("Function {name} not found")))
    }
}

#[async_trait]
impl<C: ClusterApi> TaskResolver for CrdTaskResolver<C> {
    async fn resolve(&self, request: &TaskRequest) -> Result<PodSpec> {
        let task = self.task(&request.task_name).await?;
        if task.spec.steps.is_empty() {
            return Err(Error::TaskResolution(format!(
                "Task {} has no steps",
                request.task_name
            )));
        }

        let mut containers = Vec::with_capacity(task.spec.steps.len());
        for step in &task.spec.steps {
            let function = self.function(&step.name).await?;

            let mut inputs: BTreeMap<String, String> = step
                .params
                .iter()
                .map(|p| Ok((p.name.clone(), substitute(&p.value, &request.inputs)?)))
                .collect::<Result<_>>()?;
            inputs.extend(request.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));

            let spec: FunctionSpec = substitute_all(&function.spec, &inputs)
                .map_err(|e| Error::TaskResolution(format!("Function {}: {e}", step.name)))?;
            containers.push(container_for(&step.name, spec));
        }

        let mut volumes: Vec<Volume> = task
            .spec
            .volumes
            .iter()
            .map(|v| {
                let v: TaskVolume = substitute_all(v, &request.inputs)?;
                Ok(v.source.to_volume(&v.name))
            })
            .collect::<Result<_>>()?;
        volumes.push(Volume {
            name: TMP_DIR_VOLUME.to_string(),
            empty_dir: Some(request.temp_dir.to_volume_source()),
            ..Default::default()
        });

        // every step but the last runs to completion before the main container
        let main = containers.pop().into_iter().collect();
        let mut pod_spec = PodSpec {
            init_containers: (!containers.is_empty()).then_some(containers),
            containers: main,
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        };
        request.runtime_settings.apply(&mut pod_spec);

        debug!(task = %request.task_name, "resolved task");
        Ok(pod_spec)
    }

    async fn pod_security_policies(&self, task_name: &str) -> Result<Vec<String>> {
        let task = self.task(task_name).await?;
        let mut names = BTreeSet::new();
        for step in &task.spec.steps {
            if let Some(psp) = self
                .function(&step.name)
                .await?
                .spec
                .pod_security_policy_name
                .filter(|p| !p.is_empty())
            {
                names.insert(psp);
            }
        }
        Ok(names.into_iter().collect())
    }
}

fn container_for(name: &str, spec: FunctionSpec) -> Container {
    let mut mounts: Vec<VolumeMount> = spec
        .volume_mounts
        .into_iter()
        .map(|m| VolumeMount {
            name: m.name,
            mount_path: m.mount_path,
            sub_path: m.sub_path,
            read_only: m.read_only.then_some(true),
            ..Default::default()
        })
        .collect();
    mounts.push(VolumeMount {
        name: TMP_DIR_VOLUME.to_string(),
        mount_path: TMP_DIR_MOUNT_PATH.to_string(),
        ..Default::default()
    });

    Container {
        name: name.to_string(),
        image: Some(spec.image),
        command: (!spec.command.is_empty()).then_some(spec.command),
        args: (!spec.args.is_empty()).then_some(spec.args),
        working_dir: spec.working_dir,
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

/// Replace every `${NAME}` / `${NAME:=default}` in `template`
pub fn substitute(template: &str, inputs: &BTreeMap<String, String>) -> Result<String> {
    let mut unresolved = Vec::new();
    let out = VARIABLE.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps["name"];
        match (inputs.get(name), caps.name("default")) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                unresolved.push(name.to_string());
                String::new()
            }
        }
    });
    if unresolved.is_empty() {
        Ok(out.into_owned())
    } else {
        Err(Error::TaskResolution(format!(
            "unresolved variables: {}",
            unresolved.join(", ")
        )))
    }
}

/// Substitute inputs into every string field of `value`
fn substitute_all<T>(value: &T, inputs: &BTreeMap<String, String>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    fn walk(value: &mut Value, inputs: &BTreeMap<String, String>) -> Result<()> {
        match value {
            Value::String(s) => *s = substitute(s, inputs)?,
            Value::Array(items) => {
                for item in items {
                    walk(item, inputs)?;
                }
            }
            Value::Object(fields) => {
                for field in fields.values_mut() {
                    walk(field, inputs)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    let mut raw = serde_json::to_value(value)?;
    walk(&mut raw, inputs)?;
    Ok(serde_json::from_value(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::MemoryClusterApi;
    use crate::crd::{FunctionRef, FunctionVolumeMount, Param, TaskSpec};

    fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn function(name: &str, args: &[&str], psp: Option<&str>) -> Function {
        Function::new(
            name,
            FunctionSpec {
                image: "appscode/stash:${STASH_TAG:=v0.9.0}".to_string(),
                args: args.iter().map(|a| (*a).to_string()).collect(),
                volume_mounts: vec![FunctionVolumeMount {
                    name: "${secretVolume}".to_string(),
                    mount_path: "/etc/repository/secret".to_string(),
                    ..Default::default()
                }],
                pod_security_policy_name: psp.map(str::to_string),
                ..Default::default()
            },
        )
    }

    fn seeded() -> Arc<MemoryClusterApi> {
        let api = Arc::new(MemoryClusterApi::new());
        api.seed(function("update-status", &["update-status", "--namespace=${NAMESPACE}"], None))
            .unwrap();
        api.seed(function(
            "pvc-backup",
            &["backup-pvc", "--backupsession=${BACKUP_SESSION}"],
            Some("backup-psp"),
        ))
        .unwrap();
        api.seed(Task::new(
            "pvc-backup",
            TaskSpec {
                steps: vec![
                    FunctionRef {
                        name: "pvc-backup".to_string(),
                        params: vec![Param {
                            name: "secretVolume".to_string(),
                            value: "secret-volume".to_string(),
                        }],
                    },
                    FunctionRef {
                        name: "update-status".to_string(),
                        params: vec![Param {
                            name: "secretVolume".to_string(),
                            value: "secret-volume".to_string(),
                        }],
                    },
                ],
                volumes: vec![],
            },
        ))
        .unwrap();
        api
    }

    #[test]
    fn test_substitute_defaults_and_errors() {
        let values = inputs(&[("NAMESPACE", "demo")]);
        assert_eq!(
            substitute("--namespace=${NAMESPACE} --tag=${TAG:=latest}", &values).unwrap(),
            "--namespace=demo --tag=latest"
        );
        assert_eq!(substitute("plain", &values).unwrap(), "plain");

        let err = substitute("${MISSING}/${ALSO_MISSING}", &values).unwrap_err();
        assert!(err.to_string().contains("MISSING, ALSO_MISSING"), "{err}");
    }

    #[tokio::test]
    async fn test_resolve_orders_steps() {
        let resolver = CrdTaskResolver::new(seeded());
        let request = TaskRequest {
            task_name: "pvc-backup".to_string(),
            inputs: inputs(&[("NAMESPACE", "demo"), ("BACKUP_SESSION", "s1")]),
            ..Default::default()
        };

        let pod = resolver.resolve(&request).await.unwrap();

        let init = pod.init_containers.unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "pvc-backup");
        assert_eq!(
            init[0].args.clone().unwrap(),
            vec!["backup-pvc".to_string(), "--backupsession=s1".to_string()]
        );
        assert_eq!(pod.containers[0].name, "update-status");
        assert_eq!(pod.containers[0].image.as_deref(), Some("appscode/stash:v0.9.0"));

        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        assert!(mounts.iter().any(|m| m.name == "secret-volume"));
        assert!(mounts
            .iter()
            .any(|m| m.name == TMP_DIR_VOLUME && m.mount_path == TMP_DIR_MOUNT_PATH));
        assert!(pod.volumes.unwrap().iter().any(|v| v.name == TMP_DIR_VOLUME));
    }

    #[tokio::test]
    async fn test_resolve_fails_on_missing_input() {
        let resolver = CrdTaskResolver::new(seeded());
        let request = TaskRequest {
            task_name: "pvc-backup".to_string(),
            inputs: inputs(&[("NAMESPACE", "demo")]),
            ..Default::default()
        };

        let err = resolver.resolve(&request).await.unwrap_err();
        assert!(matches!(err, Error::TaskResolution(_)));
        assert!(err.to_string().contains("BACKUP_SESSION"));
    }

    #[tokio::test]
    async fn test_missing_task() {
        let resolver = CrdTaskResolver::new(seeded());
        let request = TaskRequest {
            task_name: "mysql-backup".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            resolver.resolve(&request).await,
            Err(Error::TaskResolution(_))
        ));
    }

    #[tokio::test]
    async fn test_pod_security_policies() {
        let resolver = CrdTaskResolver::new(seeded());
        assert_eq!(
            resolver.pod_security_policies("pvc-backup").await.unwrap(),
            vec!["backup-psp".to_string()]
        );
    }
}
