//! # Session Phase
//!
//! Pure phase computation for a BackupSession from the host results recorded
//! in its status. The reconciler acts on the result; nothing here writes.

use crate::crd::{BackupSession, BackupSessionPhase, HostPhase};

/// Compute the phase of `session` and, for `Failed`, the reason.
///
/// - A recorded terminal phase is absorbing and returned unchanged.
/// - No `totalHosts`, or a phase that is unset or `Pending`, is `Pending`.
/// - Fewer (or more) reported hosts than `totalHosts` is `Running`.
/// - All hosts reported and any of them failed is `Failed`, citing the first
///   failed host in stored order.
/// - Otherwise the session `Succeeded`.
pub fn compute_phase(session: &BackupSession) -> (BackupSessionPhase, Option<String>) {
    let Some(status) = session.status.as_ref() else {
        return (BackupSessionPhase::Pending, None);
    };

    match status.phase {
        Some(phase) if phase.is_terminal() => return (phase, None),
        None | Some(BackupSessionPhase::Pending) => return (BackupSessionPhase::Pending, None),
        Some(_) => {}
    }
    let Some(total_hosts) = status.total_hosts else {
        return (BackupSessionPhase::Pending, None);
    };

    if usize::try_from(total_hosts).ok() != Some(status.stats.len()) {
        return (BackupSessionPhase::Running, None);
    }

    if let Some(failed) = status
        .stats
        .iter()
        .find(|host| host.phase == HostPhase::Failed)
    {
        let reason = format!(
            "backup failed for host: {}. Reason: {}",
            failed.hostname,
            failed.error.as_deref().unwrap_or_default()
        );
        return (BackupSessionPhase::Failed, Some(reason));
    }

    (BackupSessionPhase::Succeeded, None)
}
