//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use stash_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (BackupSession, BackupConfiguration, Repository, etc.)
//! - The cluster client seam and its in-memory implementation
//! - Reconciler, status aggregator and provisioning entry points
//! - Config types (ControllerConfig, ServerConfig)
//! - The crate error type

pub use crate::crd::*;

pub use crate::controller::client::{ClusterApi, KubeClusterApi, Managed, MemoryClusterApi};
pub use crate::controller::events::{EventRecorder, KubeEventRecorder, MemoryEventRecorder};
pub use crate::controller::phase::compute_phase;
pub use crate::controller::provision::{ensure, EnsureOutcome};
pub use crate::controller::reconciler::{ObjectKey, Reconciler, ReconcilerSettings};
pub use crate::controller::status::{BackupOutput, RestoreOutput, StatusUpdater};

pub use crate::config::{ControllerConfig, ProvisioningFailurePolicy, ServerConfig};

pub use crate::error::{Error, Result};
