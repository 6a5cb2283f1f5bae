//! In-process [`ClusterApi`] for tests and dry runs.
//!
//! Objects are stored as JSON keyed by kind, namespace and name. The store
//! assigns `resourceVersion`, `uid` and `creationTimestamp` like the API
//! server does and rejects stale writes with `Error::Conflict`, so the
//! optimistic-concurrency paths of the provisioner and status writers run
//! unchanged against it. Every successful write is appended to a log that
//! tests inspect to assert idempotence.

use super::{ClusterApi, Managed};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::error::ErrorResponse;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Create,
    Replace,
    ReplaceStatus,
}

/// One successful write against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: WriteVerb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    writes: Vec<WriteRecord>,
    /// kind -> (HTTP code, remaining failures)
    create_failures: BTreeMap<String, (u16, u32)>,
    /// kind -> remaining injected conflicts on replace/replace_status
    conflicts: BTreeMap<String, u32>,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Debug, Default)]
pub struct MemoryClusterApi {
    state: Mutex<MemoryState>,
}

fn key_of<K: Managed>(namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        K::kind(&()).to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn name_of<K: Managed>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::Validation(format!("{} has no name", K::kind(&()))))
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = value.pointer("/metadata/labels");
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels
                .and_then(|l| l.get(k.trim()))
                .and_then(Value::as_str)
                .is_some_and(|actual| actual == v.trim()),
            None => labels.and_then(|l| l.get(term)).is_some(),
        })
}

impl MemoryClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object without recording a write, as if it already existed
    pub fn seed<K: Managed>(&self, obj: K) -> Result<K> {
        let name = name_of(&obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state();
        let mut value = serde_json::to_value(&obj)?;
        stamp_new(&mut value, &mut state);
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Writes performed so far, oldest first
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// Writes of one kind
    pub fn writes_of(&self, kind: &str) -> Vec<WriteRecord> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Make the next `times` creates of `kind` fail with an API error `code`
    pub fn fail_creates(&self, kind: &str, code: u16, times: u32) {
        self.state()
            .create_failures
            .insert(kind.to_string(), (code, times));
    }

    /// Make the next `times` replaces of `kind` fail with a conflict
    pub fn conflict_writes(&self, kind: &str, times: u32) {
        self.state().conflicts.insert(kind.to_string(), times);
    }

    /// Bump an object's resourceVersion, as a concurrent writer would
    pub fn touch<K: Managed>(&self, namespace: Option<&str>, name: &str) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(value) = state.objects.get_mut(&key_of::<K>(namespace, name)) {
            value["metadata"]["resourceVersion"] = json!(version);
        }
    }

    fn take_conflict(state: &mut MemoryState, kind: &str) -> bool {
        match state.conflicts.get_mut(kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn check_version<K: Managed>(
        state: &mut MemoryState,
        stored: &Value,
        obj: &K,
        name: &str,
    ) -> Result<()> {
        let kind = K::kind(&()).to_string();
        let stale = obj
            .meta()
            .resource_version
            .as_deref()
            .is_some_and(|rv| Some(rv) != resource_version(stored));
        if stale || Self::take_conflict(state, &kind) {
            return Err(Error::Conflict {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn record(state: &mut MemoryState, verb: WriteVerb, key: &ObjectKey) {
        state.writes.push(WriteRecord {
            verb,
            kind: key.0.clone(),
            namespace: (!key.1.is_empty()).then(|| key.1.clone()),
            name: key.2.clone(),
        });
    }
}

fn stamp_new(value: &mut Value, state: &mut MemoryState) {
    let version = state.next_version();
    let meta = &mut value["metadata"];
    meta["resourceVersion"] = json!(version);
    meta["uid"] = json!(format!("uid-{version}"));
    if meta.get("creationTimestamp").is_none_or(Value::is_null) {
        meta["creationTimestamp"] = json!(chrono::Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }
}

#[async_trait]
impl ClusterApi for MemoryClusterApi {
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let state = self.state();
        state
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Error::from)
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&());
        let state = self.state();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && namespace.is_none_or(|want| want == ns.as_str())
            })
            .filter(|(_, v)| label_selector.is_none_or(|s| matches_selector(v, s)))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let name = name_of(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state();
        if let Some((code, remaining)) = state.create_failures.get_mut(&key.0) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Kube(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("injected failure creating {} {}", key.0, name),
                    reason: "Injected".to_string(),
                    code: *code,
                })));
            }
        }
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: key.0,
                name,
            });
        }
        let mut value = serde_json::to_value(obj)?;
        stamp_new(&mut value, &mut state);
        state.objects.insert(key.clone(), value.clone());
        Self::record(&mut state, WriteVerb::Create, &key);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let name = name_of(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state();
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.0.clone(), name.clone()))?;
        Self::check_version(&mut state, &stored, obj, &name)?;

        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
        if let Some(status) = stored.get("status") {
            value["status"] = status.clone();
        }
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(key.clone(), value.clone());
        Self::record(&mut state, WriteVerb::Replace, &key);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace_status<K: Managed>(&self, obj: &K, _subresource: bool) -> Result<K> {
        let name = name_of(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state();
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.0.clone(), name.clone()))?;
        Self::check_version(&mut state, &stored, obj, &name)?;

        let incoming = serde_json::to_value(obj)?;
        stored["status"] = incoming.get("status").cloned().unwrap_or(Value::Null);
        stored["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(key.clone(), stored.clone());
        Self::record(&mut state, WriteVerb::ReplaceStatus, &key);
        Ok(serde_json::from_value(stored)?)
    }
}
