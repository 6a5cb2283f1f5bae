//! API-server backed [`ClusterApi`].

use super::{ApiScope, ClusterApi, Managed};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde_json::json;
use tracing::debug;

#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: Managed>(&self, namespace: Option<&str>) -> kube::Api<K> {
        <K::Scope as ApiScope>::api(self.client.clone(), namespace)
    }
}

/// Map write failures the callers branch on into dedicated variants
fn classify<K: Managed>(err: kube::Error, name: &str) -> Error {
    let kind = K::kind(&()).to_string();
    match &err {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

fn name_of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<&str> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("{} has no name", K::kind(&()))))
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let name = name_of(obj)?;
        debug!(kind = %K::kind(&()), name, "creating object");
        self.api::<K>(obj.meta().namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, name))
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let name = name_of(obj)?;
        debug!(kind = %K::kind(&()), name, "replacing object");
        self.api::<K>(obj.meta().namespace.as_deref())
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, name))
    }

    async fn replace_status<K: Managed>(&self, obj: &K, subresource: bool) -> Result<K> {
        let name = name_of(obj)?;
        let value = serde_json::to_value(obj)?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.meta().resource_version },
            "status": value.get("status").cloned().unwrap_or_default(),
        });
        let api = self.api::<K>(obj.meta().namespace.as_deref());
        let params = PatchParams::default();
        let result = if subresource {
            api.patch_status(name, &params, &Patch::Merge(&patch)).await
        } else {
            api.patch(name, &params, &Patch::Merge(&patch)).await
        };
        result.map_err(|e| classify::<K>(e, name))
    }
}
