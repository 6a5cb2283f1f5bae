//! Phase transitions of a BackupSession.
//!
//! Every transition re-reads the session before writing and leaves a session
//! that turned terminal in the meantime untouched, so the transition's event
//! is published at most once. Terminal transitions commit the phase, publish
//! their event and then push session metrics.

use super::{hosts, Reconciler};
use crate::controller::client::{creation_time, ClusterApi};
use crate::controller::duration::format_duration;
use crate::controller::events::{actions, reasons, reference_of};
use crate::controller::status::update_status_with_retry;
use crate::crd::{BackupConfiguration, BackupSession, BackupSessionPhase, BackupSessionStatus};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::observability::pushgateway::backup_session_metrics;
use chrono::Utc;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

impl<C: ClusterApi> Reconciler<C> {
    pub(super) async fn set_running(
        &self,
        session: &BackupSession,
        configuration: &BackupConfiguration,
    ) -> Result<()> {
        let total_hosts = hosts::total_hosts(self.api.as_ref(), configuration).await?;

        let Some(updated) = self
            .commit(session, |status| {
                status.phase = Some(BackupSessionPhase::Running);
                status.total_hosts = Some(total_hosts);
            })
            .await?
        else {
            return Ok(());
        };

        metrics::increment_phase_transition(BackupSessionPhase::Running.as_str());
        info!(total_hosts, "BackupSession is running");
        self.publish(
            &updated,
            EventType::Normal,
            reasons::BACKUP_SESSION_RUNNING,
            "Backup job has been created successfully/sidecar is watching the BackupSession."
                .to_string(),
        )
        .await;
        Ok(())
    }

    pub(super) async fn set_failed(
        &self,
        session: &BackupSession,
        configuration: Option<&BackupConfiguration>,
        reason: &str,
    ) -> Result<()> {
        let Some(updated) = self
            .finish(session, BackupSessionPhase::Failed, None)
            .await?
        else {
            return Ok(());
        };

        warn!(reason, "BackupSession failed");
        self.publish(
            &updated,
            EventType::Warning,
            reasons::BACKUP_SESSION_FAILED,
            format!("Backup session failed to complete. Reason: {reason}"),
        )
        .await;
        self.push_session_metrics(&updated, configuration).await
    }

    pub(super) async fn set_succeeded(&self, session: &BackupSession) -> Result<()> {
        let elapsed = creation_time(session)
            .and_then(|created| (Utc::now() - created).to_std().ok())
            .unwrap_or_default();
        let duration = format_duration(elapsed);

        let Some(updated) = self
            .finish(session, BackupSessionPhase::Succeeded, Some(duration.clone()))
            .await?
        else {
            return Ok(());
        };

        info!(session_duration = %duration, "BackupSession succeeded");
        self.publish(
            &updated,
            EventType::Normal,
            reasons::BACKUP_SESSION_SUCCEEDED,
            "Backup session completed successfully".to_string(),
        )
        .await;
        self.push_session_metrics(&updated, None).await
    }

    /// Skipped sessions push no metrics: nothing ran.
    pub(super) async fn set_skipped(&self, session: &BackupSession, reason: &str) -> Result<()> {
        let Some(updated) = self
            .commit(session, |status| {
                status.phase = Some(BackupSessionPhase::Skipped);
            })
            .await?
        else {
            return Ok(());
        };

        metrics::increment_phase_transition(BackupSessionPhase::Skipped.as_str());
        warn!(reason, "BackupSession skipped");
        self.publish(
            &updated,
            EventType::Warning,
            reasons::BACKUP_SESSION_SKIPPED,
            reason.to_string(),
        )
        .await;
        Ok(())
    }

    /// Fail `session` because its job could not be provisioned
    pub(super) async fn handle_job_creation_failure(
        &self,
        session: &BackupSession,
        configuration: &BackupConfiguration,
        err: &Error,
    ) -> Result<()> {
        warn!(error = %err, "failed to provision backup job");

        let Some(updated) = self
            .finish(session, BackupSessionPhase::Failed, None)
            .await?
        else {
            return Ok(());
        };

        self.publish(
            &updated,
            EventType::Warning,
            reasons::BACKUP_JOB_CREATION_FAILED,
            format!(
                "failed to create backup job for BackupSession {}/{}. Reason: {err}",
                session.namespace().unwrap_or_default(),
                session.name_any()
            ),
        )
        .await;
        self.publish(
            &updated,
            EventType::Warning,
            reasons::BACKUP_SESSION_FAILED,
            format!("Backup session failed to complete. Reason: {err}"),
        )
        .await;
        self.push_session_metrics(&updated, Some(configuration))
            .await
    }

    /// Commit a terminal phase
    async fn finish(
        &self,
        session: &BackupSession,
        phase: BackupSessionPhase,
        session_duration: Option<String>,
    ) -> Result<Option<BackupSession>> {
        let committed = self
            .commit(session, |status| {
                status.phase = Some(phase);
                if let Some(duration) = &session_duration {
                    status.session_duration = Some(duration.clone());
                }
            })
            .await?;
        if committed.is_some() {
            metrics::increment_phase_transition(phase.as_str());
        }
        Ok(committed)
    }

    /// Push the metrics of a finished session
    ///
    /// The phase is already committed, so later reconciles skip the session.
    /// Failed pushes are retried here and the last error is returned.
    async fn push_session_metrics(
        &self,
        session: &BackupSession,
        configuration: Option<&BackupConfiguration>,
    ) -> Result<()> {
        let Some(sink) = &self.metrics else {
            return Ok(());
        };
        let fetched;
        let configuration = match configuration {
            Some(configuration) => configuration,
            None => {
                fetched = self.configuration_of(session).await?;
                &fetched
            }
        };
        let status = session.status.clone().unwrap_or_default();
        let batch = backup_session_metrics(&self.settings.metrics_job, configuration, &status)?;

        let attempts = self.settings.metrics_push_attempts.max(1);
        let mut failures = 0;
        loop {
            match sink.push(&batch).await {
                Ok(()) => return Ok(()),
                Err(e) if failures + 1 < attempts => {
                    let delay = self.settings.provisioning_backoff.delay(failures);
                    warn!(error = %e, attempt = failures + 1, "metrics push failed, retrying");
                    tokio::time::sleep(delay).await;
                    failures += 1;
                }
                Err(e) => {
                    error!(error = %e, attempts, "giving up on session metrics");
                    return Err(e);
                }
            }
        }
    }

    /// Write the session status through `mutate`
    ///
    /// Returns `None` when the stored session is already terminal, in which
    /// case nothing is written.
    async fn commit<F>(&self, session: &BackupSession, mutate: F) -> Result<Option<BackupSession>>
    where
        F: Fn(&mut BackupSessionStatus) + Sync,
    {
        let namespace = session.namespace().unwrap_or_default();
        let finished_elsewhere = AtomicBool::new(false);
        let updated: BackupSession = update_status_with_retry(
            self.api.as_ref(),
            &namespace,
            &session.name_any(),
            self.settings.enable_status_subresource,
            self.settings.conflict_retries,
            |current: &mut BackupSession| {
                let terminal = current.is_terminal();
                finished_elsewhere.store(terminal, Ordering::Relaxed);
                if !terminal {
                    mutate(current.status.get_or_insert_with(Default::default));
                }
                Ok(())
            },
        )
        .await?;

        if finished_elsewhere.load(Ordering::Relaxed) {
            info!(phase = ?updated.phase(), "BackupSession finished concurrently");
            return Ok(None);
        }
        Ok(Some(updated))
    }

    async fn publish(&self, session: &BackupSession, type_: EventType, reason: &str, note: String) {
        self.recorder
            .publish(
                &reference_of(session),
                type_,
                reason,
                actions::RECONCILE,
                note,
            )
            .await;
    }
}
