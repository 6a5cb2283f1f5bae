//! # Errors
//!
//! Crate-wide error type.
//!
//! Cluster API failures are classified at the client seam so that callers can
//! match on conflicts and missing objects without inspecting HTTP codes. The
//! [`Error::is_transient`] split drives both the dispatcher retry path and the
//! provisioning failure policy.

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any Kubernetes API failure not classified below
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-concurrency failure: the object changed since it was read
    #[error("conflicting update to {kind} {name}")]
    Conflict { kind: String, name: String },

    #[error("gave up updating {kind} {name} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        kind: String,
        name: String,
        attempts: u32,
    },

    #[error("task resolution failed: {0}")]
    TaskResolution(String),

    #[error("invalid job template: {0}")]
    JobTemplate(String),

    #[error("host {hostname} would exceed totalHosts={total_hosts}")]
    HostLimitExceeded { hostname: String, total_hosts: i32 },

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("metrics push failed: {0}")]
    MetricsPush(String),

    #[error("{0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// API throttling, server-side failures, transport errors and write
    /// conflicts are transient. Everything derived from the objects' content
    /// (bad templates, unresolvable tasks, missing objects, permission denials)
    /// is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => {
                matches!(response.code, 408 | 429 | 500..=599)
            }
            Self::Kube(_)
            | Self::Conflict { .. }
            | Self::AlreadyExists { .. }
            | Self::ConflictRetriesExhausted { .. }
            | Self::MetricsPush(_) => true,
            Self::NotFound { .. }
            | Self::TaskResolution(_)
            | Self::JobTemplate(_)
            | Self::HostLimitExceeded { .. }
            | Self::InvalidOutput(_)
            | Self::Validation(_)
            | Self::Serialization(_)
            | Self::Io(_) => false,
        }
    }

    /// Conflicts and creation races restart a read-modify-write cycle.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}
