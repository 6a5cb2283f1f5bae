//! # Phase Tests
//!
//! Session phase scenarios as hosts report in.

mod common;

use common::{running_session, session};
use stash_controller::controller::phase::compute_phase;
use stash_controller::crd::BackupSessionPhase;

#[test]
fn test_new_session_is_pending() {
    assert_eq!(compute_phase(&session("bs-1")), (BackupSessionPhase::Pending, None));
}

#[test]
fn test_statefulset_progress() {
    let mut bs = running_session("bs-1", 3, &[]);
    assert_eq!(compute_phase(&bs).0, BackupSessionPhase::Running);

    bs = running_session("bs-1", 3, &[("host-0", None), ("host-2", None)]);
    assert_eq!(compute_phase(&bs).0, BackupSessionPhase::Running);

    bs = running_session(
        "bs-1",
        3,
        &[("host-0", None), ("host-2", None), ("host-1", None)],
    );
    assert_eq!(compute_phase(&bs), (BackupSessionPhase::Succeeded, None));
}

#[test]
fn test_failure_waits_for_every_host() {
    let partial = running_session("bs-1", 2, &[("host-0", Some("stale lock"))]);
    assert_eq!(compute_phase(&partial).0, BackupSessionPhase::Running);

    let done = running_session(
        "bs-1",
        2,
        &[("host-0", Some("stale lock")), ("host-1", Some("disk full"))],
    );
    assert_eq!(
        compute_phase(&done),
        (
            BackupSessionPhase::Failed,
            Some("backup failed for host: host-0. Reason: stale lock".to_string())
        )
    );
}

#[test]
fn test_recorded_outcome_is_final() {
    for terminal in [
        BackupSessionPhase::Succeeded,
        BackupSessionPhase::Failed,
        BackupSessionPhase::Skipped,
    ] {
        let mut bs = running_session("bs-1", 2, &[("host-0", Some("late report"))]);
        if let Some(status) = bs.status.as_mut() {
            status.phase = Some(terminal);
        }
        assert_eq!(compute_phase(&bs), (terminal, None));
    }
}
