//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server and client setup
//! - `watch_loop`: informers feeding the work queue and its workers
//! - `error_policy`: classification and backoff of watch stream errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
