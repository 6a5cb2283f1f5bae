//! # Status Aggregator
//!
//! Merges the results reported by backup and restore hosts into session
//! status.
//!
//! The aggregator only records facts: each host result is upserted into
//! `status.stats` by hostname and announced with one event. Deciding the
//! session phase is left to the reconciler, which sees the status change
//! through its watch. After a fully successful backup the Repository's
//! statistics are refreshed, and when a metrics sink is configured the host
//! metrics are pushed on every call.
//!
//! ## Module Structure
//!
//! - `output.rs` - Result files written by backup and restore steps

mod output;

pub use output::{BackupOutput, RepositoryStats, RestoreOutput};

use crate::constants::{DEFAULT_CONFLICT_RETRIES, PROM_JOB_BACKUP_SESSION_CONTROLLER};
use crate::controller::client::{ClusterApi, Managed};
use crate::controller::events::{actions, reasons, reference_of, EventRecorder};
use crate::crd::{
    BackupConfiguration, BackupSession, BackupSessionStatus, HostBackupStats, HostPhase,
    HostRestoreStats, Repository, RestoreSession, RestoreSessionStatus,
};
use crate::error::{Error, Result};
use crate::observability::pushgateway::{backup_host_metrics, restore_host_metrics};
use crate::observability::MetricsSink;
use chrono::{SecondsFormat, Utc};
use kube::runtime::events::EventType;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Read `namespace/name`, apply `mutate` and write the status back
///
/// A write that races another writer re-reads the object and applies
/// `mutate` again. Nothing is written when `mutate` leaves the object as it
/// was.
pub async fn update_status_with_retry<K, C, F>(
    api: &C,
    namespace: &str,
    name: &str,
    subresource: bool,
    conflict_retries: u32,
    mutate: F,
) -> Result<K>
where
    K: Managed,
    C: ClusterApi,
    F: Fn(&mut K) -> Result<()> + Sync,
{
    let kind = K::kind(&()).to_string();
    let attempts = conflict_retries.max(1);

    for attempt in 1..=attempts {
        let current: K = api
            .get(Some(namespace), name)
            .await?
            .ok_or_else(|| Error::not_found(kind.clone(), format!("{namespace}/{name}")))?;
        let mut desired = current.clone();
        mutate(&mut desired)?;
        if desired == current {
            return Ok(current);
        }
        match api.replace_status(&desired, subresource).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!(kind = %kind, namespace, name, attempt, "status write raced, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::ConflictRetriesExhausted {
        kind,
        name: format!("{namespace}/{name}"),
        attempts,
    })
}

/// Insert or replace the stats of `stats.hostname`
///
/// A hostname not seen before is rejected once `totalHosts` hosts have
/// reported.
pub fn upsert_host_backup_stats(
    status: &mut BackupSessionStatus,
    stats: HostBackupStats,
) -> Result<()> {
    if let Some(existing) = status.stats.iter_mut().find(|s| s.hostname == stats.hostname) {
        *existing = stats;
        return Ok(());
    }
    check_host_limit(status.total_hosts, status.stats.len(), &stats.hostname)?;
    status.stats.push(stats);
    Ok(())
}

pub fn upsert_host_restore_stats(
    status: &mut RestoreSessionStatus,
    stats: HostRestoreStats,
) -> Result<()> {
    if let Some(existing) = status.stats.iter_mut().find(|s| s.hostname == stats.hostname) {
        *existing = stats;
        return Ok(());
    }
    check_host_limit(status.total_hosts, status.stats.len(), &stats.hostname)?;
    status.stats.push(stats);
    Ok(())
}

fn check_host_limit(total_hosts: Option<i32>, reported: usize, hostname: &str) -> Result<()> {
    match total_hosts {
        Some(total) if i32::try_from(reported).unwrap_or(i32::MAX) >= total => {
            Err(Error::HostLimitExceeded {
                hostname: hostname.to_string(),
                total_hosts: total,
            })
        }
        _ => Ok(()),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Writes host results into BackupSession, RestoreSession and Repository
/// status
pub struct StatusUpdater<C> {
    api: Arc<C>,
    recorder: Arc<dyn EventRecorder>,
    metrics: Option<Arc<dyn MetricsSink>>,
    metrics_job: String,
    enable_status_subresource: bool,
    conflict_retries: u32,
}

impl<C> std::fmt::Debug for StatusUpdater<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusUpdater")
            .field("metrics_job", &self.metrics_job)
            .field("enable_status_subresource", &self.enable_status_subresource)
            .field("conflict_retries", &self.conflict_retries)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterApi> StatusUpdater<C> {
    pub fn new(api: Arc<C>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            api,
            recorder,
            metrics: None,
            metrics_job: PROM_JOB_BACKUP_SESSION_CONTROLLER.to_string(),
            enable_status_subresource: true,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Push host metrics to `sink` under `job`
    #[must_use]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>, job: &str) -> Self {
        self.metrics = Some(sink);
        self.metrics_job = job.to_string();
        self
    }

    #[must_use]
    pub fn with_status_subresource(mut self, enabled: bool) -> Self {
        self.enable_status_subresource = enabled;
        self
    }

    #[must_use]
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Merge one host's backup result into the session and announce it
    pub async fn update_backup_session_status_for_host(
        &self,
        namespace: &str,
        session_name: &str,
        stats: &HostBackupStats,
    ) -> Result<BackupSession> {
        let mut stats = stats.clone();
        stats.phase = HostPhase::from_error(stats.error.as_deref());

        let session: BackupSession = update_status_with_retry(
            self.api.as_ref(),
            namespace,
            session_name,
            self.enable_status_subresource,
            self.conflict_retries,
            |session: &mut BackupSession| {
                let status = session.status.get_or_insert_with(Default::default);
                upsert_host_backup_stats(status, stats.clone())
            },
        )
        .await?;

        let (type_, reason, note) = match stats.error_message() {
            Some(error) => (
                EventType::Warning,
                reasons::HOST_BACKUP_FAILED,
                format!("backup failed for host \"{}\". Reason: {error}", stats.hostname),
            ),
            None => (
                EventType::Normal,
                reasons::HOST_BACKUP_SUCCEEDED,
                format!("backup succeeded for host {}", stats.hostname),
            ),
        };
        self.recorder
            .publish(&reference_of(&session), type_, reason, actions::UPDATE_STATUS, note)
            .await;
        info!(namespace, session = session_name, host = %stats.hostname, phase = ?stats.phase, "recorded host backup result");
        Ok(session)
    }

    /// Merge one host's restore result into the session and announce it
    pub async fn update_restore_session_status_for_host(
        &self,
        namespace: &str,
        session_name: &str,
        stats: &HostRestoreStats,
    ) -> Result<RestoreSession> {
        let mut stats = stats.clone();
        stats.phase = HostPhase::from_error(stats.error.as_deref());

        let session: RestoreSession = update_status_with_retry(
            self.api.as_ref(),
            namespace,
            session_name,
            self.enable_status_subresource,
            self.conflict_retries,
            |session: &mut RestoreSession| {
                let status = session.status.get_or_insert_with(Default::default);
                upsert_host_restore_stats(status, stats.clone())
            },
        )
        .await?;

        let (type_, reason, note) = match stats.error_message() {
            Some(error) => (
                EventType::Warning,
                reasons::HOST_RESTORE_FAILED,
                format!("restore failed for host \"{}\". Reason: {error}", stats.hostname),
            ),
            None => (
                EventType::Normal,
                reasons::HOST_RESTORE_SUCCEEDED,
                format!("restore succeeded for host \"{}\"", stats.hostname),
            ),
        };
        self.recorder
            .publish(&reference_of(&session), type_, reason, actions::UPDATE_STATUS, note)
            .await;
        info!(namespace, session = session_name, host = %stats.hostname, phase = ?stats.phase, "recorded host restore result");
        Ok(session)
    }

    /// Record a complete backup output
    pub async fn update_post_backup_status(
        &self,
        namespace: &str,
        session_name: &str,
        repository: Option<&str>,
        output: &BackupOutput,
    ) -> Result<()> {
        let mut session = None;
        for stats in &output.host_backup_stats {
            session = Some(
                self.update_backup_session_status_for_host(namespace, session_name, stats)
                    .await?,
            );
        }
        let session = match session {
            Some(session) => session,
            None => self
                .api
                .get::<BackupSession>(Some(namespace), session_name)
                .await?
                .ok_or_else(|| {
                    Error::not_found("BackupSession", format!("{namespace}/{session_name}"))
                })?,
        };

        let repo = &output.repository_stats;
        if output.succeeded() && repo.integrity.is_some() {
            let repository = repository.ok_or_else(|| {
                Error::Validation("repository name is required to update its status".to_string())
            })?;
            self.update_repository_status(namespace, repository, repo)
                .await?;
        }

        if let Some(sink) = &self.metrics {
            let configuration: BackupConfiguration = self
                .api
                .get(Some(namespace), session.configuration_name())
                .await?
                .ok_or_else(|| {
                    Error::not_found(
                        "BackupConfiguration",
                        format!("{namespace}/{}", session.configuration_name()),
                    )
                })?;
            let batch = backup_host_metrics(&self.metrics_job, &configuration, output)?;
            sink.push(&batch).await?;
        }
        Ok(())
    }

    /// Record a complete restore output
    pub async fn update_post_restore_status(
        &self,
        namespace: &str,
        session_name: &str,
        output: &RestoreOutput,
    ) -> Result<()> {
        let mut session = None;
        for stats in &output.host_restore_stats {
            session = Some(
                self.update_restore_session_status_for_host(namespace, session_name, stats)
                    .await?,
            );
        }

        if let Some(sink) = &self.metrics {
            let session = match session {
                Some(session) => session,
                None => self
                    .api
                    .get::<RestoreSession>(Some(namespace), session_name)
                    .await?
                    .ok_or_else(|| {
                        Error::not_found("RestoreSession", format!("{namespace}/{session_name}"))
                    })?,
            };
            let batch = restore_host_metrics(&self.metrics_job, &session, output)?;
            sink.push(&batch).await?;
        }
        Ok(())
    }

    pub async fn update_backup_status_from_file(
        &self,
        namespace: &str,
        session_name: &str,
        repository: Option<&str>,
        path: &Path,
    ) -> Result<()> {
        let output = BackupOutput::read_from_file(path)?;
        self.update_post_backup_status(namespace, session_name, repository, &output)
            .await
    }

    pub async fn update_restore_status_from_file(
        &self,
        namespace: &str,
        session_name: &str,
        path: &Path,
    ) -> Result<()> {
        let output = RestoreOutput::read_from_file(path)?;
        self.update_post_restore_status(namespace, session_name, &output)
            .await
    }

    async fn update_repository_status(
        &self,
        namespace: &str,
        name: &str,
        stats: &RepositoryStats,
    ) -> Result<Repository> {
        let timestamp = now();
        update_status_with_retry(
            self.api.as_ref(),
            namespace,
            name,
            self.enable_status_subresource,
            self.conflict_retries,
            |repository: &mut Repository| {
                let status = repository.status.get_or_insert_with(Default::default);
                status.integrity = stats.integrity;
                status.size = stats.size.clone();
                status.snapshot_count = stats.snapshot_count;
                status.snapshots_removed_on_last_cleanup = stats.snapshots_removed_on_last_cleanup;
                status.last_backup_time = Some(timestamp.clone());
                if status.first_backup_time.is_none() {
                    status.first_backup_time = Some(timestamp.clone());
                }
                Ok(())
            },
        )
        .await
    }
}
