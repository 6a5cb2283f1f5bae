//! # Controller
//!
//! Core controller modules for the Stash BackupSession controller.
//!
//! - `backoff`: Exponential backoff for queue requeues and provisioning retries
//! - `client`: Cluster API seam with Kubernetes and in-memory implementations
//! - `duration`: Compact duration strings written into session status
//! - `events`: Kubernetes event recording
//! - `job_template`: Volume-snapshot job template and local backend volumes
//! - `phase`: Pure BackupSession phase computation
//! - `provision`: Idempotent ServiceAccount, RBAC and Job provisioning
//! - `queue`: Rate-limited work queue and its worker pool
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `status`: Host result aggregation into session and repository status
//! - `task`: Task resolution into backup job pod specs

pub mod backoff;
pub mod client;
pub mod duration;
pub mod events;
pub mod job_template;
pub mod phase;
pub mod provision;
pub mod queue;
pub mod reconciler;
pub mod server;
pub mod status;
pub mod task;
