//! # Events
//!
//! Kubernetes Events attached to sessions and configurations.
//!
//! Publishing is fire-and-forget: a failed event is logged as a warning and
//! never fails a reconcile. Terminal-phase events are emitted only after the
//! phase write has committed, so a retried reconcile never repeats them.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    pub const BACKUP_SESSION_RUNNING: &str = "BackupSessionRunning";
    pub const BACKUP_SESSION_SUCCEEDED: &str = "BackupSessionSucceeded";
    pub const BACKUP_SESSION_FAILED: &str = "BackupSessionFailed";
    pub const BACKUP_SESSION_SKIPPED: &str = "BackupSessionSkipped";
    pub const BACKUP_JOB_CREATION_FAILED: &str = "BackupJobCreationFailed";
    pub const HOST_BACKUP_SUCCEEDED: &str = "HostBackupSucceeded";
    pub const HOST_BACKUP_FAILED: &str = "HostBackupFailed";
    pub const HOST_RESTORE_SUCCEEDED: &str = "HostRestoreSucceeded";
    pub const HOST_RESTORE_FAILED: &str = "HostRestoreFailed";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const PROVISION: &str = "Provision";
    pub const UPDATE_STATUS: &str = "UpdateStatus";
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    );
}

/// Reference to `obj` suitable as an event subject
pub fn reference_of<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    obj.object_ref(&())
}

pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    /// `component` appears as the reporting component of every event
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                reason,
                action,
                object = object.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event captured by [`MemoryEventRecorder`]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub type_: EventType,
    pub reason: String,
    pub note: String,
}

/// Keeps published events in memory
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events carrying `reason`
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: String,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                kind: object.kind.clone(),
                name: object.name.clone(),
                type_,
                reason: reason.to_string(),
                note,
            });
    }
}
