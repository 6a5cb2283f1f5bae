//! # Session Reconciler
//!
//! Drives one BackupSession from creation to a terminal phase.
//!
//! ## Reconciliation Flow
//!
//! 1. Sessions already in a terminal phase are left alone
//! 2. The phase is recomputed from the recorded host results; a finished
//!    session is moved to `Succeeded` or `Failed`, a running one is left to
//!    its hosts
//! 3. The BackupConfiguration is fetched; a paused configuration skips the
//!    session before anything is provisioned
//! 4. The backup model is chosen:
//!    - sidecar: the workload's sidecar takes the backup, the session only
//!      moves to `Running`
//!    - volume snapshotter: ServiceAccount, RBAC and a `create-vs` Job
//!    - restic job: ServiceAccount, RBAC and a Job resolved from the task
//! 5. A provisioning failure fails the session with a
//!    `BackupJobCreationFailed` event
//!
//! ## Module Structure
//!
//! - `jobs.rs` - Provisioning of the backup and volume-snapshot jobs
//! - `transitions.rs` - Phase transitions, their events and metrics
//! - `inputs.rs` - Implicit task inputs
//! - `hosts.rs` - Number of hosts a session waits for
//! - `admission.rs` - Create and update validation of BackupSessions

mod admission;
mod hosts;
mod inputs;
mod jobs;
mod transitions;

pub use admission::{validate_backup_session_create, validate_backup_session_update};
pub use hosts::total_hosts;
pub use inputs::{implicit_inputs, merge_inputs};
pub use jobs::{backup_job_name, volume_snapshot_job_name};

use crate::config::{ControllerConfig, ProvisioningFailurePolicy};
use crate::constants::{DEFAULT_METRICS_PUSH_ATTEMPTS, PROM_JOB_BACKUP_SESSION_CONTROLLER};
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::client::{ClusterApi, Managed};
use crate::controller::events::EventRecorder;
use crate::controller::job_template::ImageRef;
use crate::controller::phase::compute_phase;
use crate::controller::queue::KeyHandler;
use crate::controller::task::TaskResolver;
use crate::crd::{BackupConfiguration, BackupSession, BackupSessionPhase, Snapshotter};
use crate::error::{Error, Result};
use crate::observability::{metrics, MetricsSink};
use async_trait::async_trait;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Namespace and name of a BackupSession
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object; `None` when it carries no namespace
    pub fn of<K: kube::Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Knobs of the reconciler, usually derived from [`ControllerConfig`]
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Stash image of volume-snapshot jobs
    pub image: ImageRef,
    pub enable_status_subresource: bool,
    pub provisioning_failure_policy: ProvisioningFailurePolicy,
    /// In-line provisioning attempts under `RetryTransient`
    pub provisioning_attempts: u32,
    pub provisioning_backoff: ExponentialBackoff,
    pub conflict_retries: u32,
    /// Pushgateway job of session metrics
    pub metrics_job: String,
    /// Attempts at pushing the metrics of a finished session
    pub metrics_push_attempts: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl ReconcilerSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            image: config.image(),
            enable_status_subresource: config.enable_status_subresource,
            provisioning_failure_policy: config.provisioning_failure_policy,
            provisioning_attempts: config.provisioning_attempts.max(1),
            provisioning_backoff: ExponentialBackoff::new(
                Duration::from_millis(config.backoff_start_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
            conflict_retries: config.conflict_retries,
            metrics_job: PROM_JOB_BACKUP_SESSION_CONTROLLER.to_string(),
            metrics_push_attempts: DEFAULT_METRICS_PUSH_ATTEMPTS,
        }
    }
}

/// Reconciles BackupSessions through a [`ClusterApi`]
pub struct Reconciler<C> {
    api: Arc<C>,
    recorder: Arc<dyn EventRecorder>,
    tasks: Arc<dyn TaskResolver>,
    metrics: Option<Arc<dyn MetricsSink>>,
    settings: ReconcilerSettings,
}

impl<C> fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .field("push_metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: ClusterApi> Reconciler<C> {
    pub fn new(
        api: Arc<C>,
        recorder: Arc<dyn EventRecorder>,
        tasks: Arc<dyn TaskResolver>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            api,
            recorder,
            tasks,
            metrics: None,
            settings,
        }
    }

    /// Push session metrics to `sink` on every terminal transition
    #[must_use]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Reconcile the BackupSession behind `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let span = tracing::info_span!(
            "controller.reconcile",
            resource.kind = "BackupSession",
            resource.namespace = %key.namespace,
            resource.name = %key.name,
        );

        async {
            let start = Instant::now();
            metrics::increment_reconciliations();

            let result = self.reconcile_session(key).await;

            metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            if let Err(e) = &result {
                metrics::increment_reconciliation_errors();
                warn!(error = %e, "reconciliation failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconcile_session(&self, key: &ObjectKey) -> Result<()> {
        let Some(session) = self
            .get::<BackupSession>(&key.namespace, &key.name)
            .await?
        else {
            debug!("BackupSession no longer exists");
            return Ok(());
        };

        if session.is_terminal() {
            debug!(phase = ?session.phase(), "BackupSession already finished");
            return Ok(());
        }

        match compute_phase(&session) {
            (BackupSessionPhase::Failed, reason) => {
                let reason = reason.unwrap_or_default();
                return self.set_failed(&session, None, &reason).await;
            }
            (BackupSessionPhase::Succeeded, _) => return self.set_succeeded(&session).await,
            (BackupSessionPhase::Running | BackupSessionPhase::Skipped, _) => {
                debug!("waiting for hosts to report");
                return Ok(());
            }
            (BackupSessionPhase::Pending, _) => {}
        }

        let configuration = self.configuration_of(&session).await?;

        if configuration.spec.paused {
            let reason = format!(
                "BackupConfiguration {}/{} is paused",
                key.namespace,
                configuration.name_any()
            );
            return self.set_skipped(&session, &reason).await;
        }

        if configuration.uses_sidecar() {
            info!("sidecar of the target takes the backup");
            return self.set_running(&session, &configuration).await;
        }

        match self.provision(&session, &configuration).await {
            Ok(()) => self.set_running(&session, &configuration).await,
            Err(e) => {
                self.handle_job_creation_failure(&session, &configuration, &e)
                    .await
            }
        }
    }

    /// Provision the job taking the backup, honouring the failure policy
    async fn provision(
        &self,
        session: &BackupSession,
        configuration: &BackupConfiguration,
    ) -> Result<()> {
        let snapshot = configuration.spec.driver == Snapshotter::VolumeSnapshotter
            && configuration.spec.target.is_some();
        let mut failures = 0;

        loop {
            let result = if snapshot {
                self.ensure_volume_snapshot_job(session, configuration).await
            } else {
                self.ensure_backup_job(session, configuration).await
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e)
                    if self.settings.provisioning_failure_policy
                        == ProvisioningFailurePolicy::RetryTransient
                        && e.is_transient()
                        && failures + 1 < self.settings.provisioning_attempts =>
                {
                    let delay = self.settings.provisioning_backoff.delay(failures);
                    warn!(
                        error = %e,
                        attempt = failures + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient provisioning error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    failures += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn configuration_of(&self, session: &BackupSession) -> Result<BackupConfiguration> {
        let namespace = session.namespace().unwrap_or_default();
        self.get::<BackupConfiguration>(&namespace, session.configuration_name())
            .await?
            .ok_or_else(|| {
                Error::not_found(
                    "BackupConfiguration",
                    format!("{namespace}/{}", session.configuration_name()),
                )
            })
    }

    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api.get(Some(namespace), name).await
    }
}

#[async_trait]
impl<C: ClusterApi> KeyHandler<ObjectKey> for Reconciler<C> {
    async fn handle(&self, key: &ObjectKey) -> Result<()> {
        self.reconcile(key).await
    }
}
