//! # Cluster API Seam
//!
//! Every read and write the controller performs goes through [`ClusterApi`].
//! [`KubeClusterApi`] talks to the API server; [`MemoryClusterApi`] keeps
//! objects in process and drives the reconciler and aggregator tests.
//!
//! Writes are optimistic: `replace` and `replace_status` carry the
//! `resourceVersion` that was read, so a concurrent writer surfaces as
//! [`Error::Conflict`](crate::Error::Conflict) instead of a lost update.

mod kube_api;
mod memory;

pub use self::kube_api::KubeClusterApi;
pub use self::memory::{MemoryClusterApi, WriteRecord, WriteVerb};

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::Api;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Builds an [`Api`] for a resource according to its scope
pub trait ApiScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>;
}

impl ApiScope for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl ApiScope for ClusterResourceScope {
    fn api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::all(client)
    }
}

/// Objects the controller reads and writes
pub trait Managed:
    Resource<DynamicType = (), Scope: ApiScope>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope: ApiScope>
        + Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// List objects, optionally restricted to a namespace and an equality
    /// label selector (`key=value,key2=value2`).
    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>>;

    /// Create an object. An existing object yields `Error::AlreadyExists`.
    async fn create<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Replace an object as of the `resourceVersion` it carries.
    async fn replace<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Write only the status of an object, as of its `resourceVersion`.
    ///
    /// With `subresource` the write goes through the `/status` endpoint,
    /// otherwise through the main resource.
    async fn replace_status<K: Managed>(&self, obj: &K, subresource: bool) -> Result<K>;
}

/// `namespace/name` for log lines and event messages
pub fn object_name<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    match meta.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, meta.name.as_deref().unwrap_or_default()),
        None => meta.name.clone().unwrap_or_default(),
    }
}

/// Creation time of an object, if the API server stamped one
pub fn creation_time<K: Resource>(obj: &K) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = serde_json::to_value(obj.meta().creation_timestamp.as_ref()?).ok()?;
    chrono::DateTime::parse_from_rfc3339(raw.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc))
}
