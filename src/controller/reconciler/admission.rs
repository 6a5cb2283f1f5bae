//! # BackupSession Admission
//!
//! Predicates a validating webhook applies to BackupSession writes.

use crate::crd::BackupSession;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

// RFC 1123 subdomain: [a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*
static RFC1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("RFC 1123 regex is valid")
});

/// Validate Kubernetes resource name (RFC 1123 subdomain)
/// Length: 1-253 characters
fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{field_name} cannot be empty")));
    }

    if name.len() > 253 {
        return Err(Error::Validation(format!(
            "{field_name} '{name}' exceeds maximum length of 253 characters (got {})",
            name.len()
        )));
    }

    if !RFC1123_SUBDOMAIN.is_match(name) {
        return Err(Error::Validation(format!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        )));
    }

    Ok(())
}

/// A new session must reference its BackupConfiguration by a valid name
pub fn validate_backup_session_create(session: &BackupSession) -> Result<()> {
    validate_kubernetes_name(
        &session.spec.backup_configuration.name,
        "spec.backupConfiguration.name",
    )
}

/// The spec of a BackupSession never changes after creation
pub fn validate_backup_session_update(old: &BackupSession, new: &BackupSession) -> Result<()> {
    if serde_json::to_value(&old.spec)? != serde_json::to_value(&new.spec)? {
        return Err(Error::Validation(
            "BackupSession spec is immutable".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupSessionPhase, BackupSessionSpec, BackupSessionStatus, LocalObjectRef};

    fn session(configuration: &str) -> BackupSession {
        BackupSession::new(
            "bs-1",
            BackupSessionSpec {
                backup_configuration: LocalObjectRef {
                    name: configuration.to_string(),
                },
            },
        )
    }

    #[test]
    fn test_create_requires_valid_configuration_name() {
        assert!(validate_backup_session_create(&session("sample-mysql-backup")).is_ok());
        assert!(validate_backup_session_create(&session("app.v1")).is_ok());

        for invalid in ["", "Sample", "-backup", "backup-", "back_up"] {
            assert!(
                validate_backup_session_create(&session(invalid)).is_err(),
                "'{invalid}' should be rejected"
            );
        }
        assert!(validate_backup_session_create(&session(&"a".repeat(254))).is_err());
    }

    #[test]
    fn test_update_rejects_spec_change() {
        let err = validate_backup_session_update(&session("a"), &session("b")).unwrap_err();
        assert_eq!(err.to_string(), "BackupSession spec is immutable");
    }

    #[test]
    fn test_update_allows_status_and_metadata_changes() {
        let old = session("a");
        let mut new = session("a");
        new.metadata.labels = Some([("team".to_string(), "db".to_string())].into());
        new.status = Some(BackupSessionStatus {
            phase: Some(BackupSessionPhase::Running),
            ..Default::default()
        });
        assert!(validate_backup_session_update(&old, &new).is_ok());
    }
}
