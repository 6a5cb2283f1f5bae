//! Stash BackupSession Controller Library
//!
//! This library provides the reconciliation engine that drives Stash
//! `BackupSession` objects from creation to a terminal phase: it provisions
//! backup jobs and their RBAC, folds per-host results into session status, and
//! reports the outcome through Kubernetes events and Prometheus metrics.
//!
//! ## Quick Start
//!
//! ```rust
//! use stash_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod prelude;
pub mod runtime;

pub use error::{Error, Result};
