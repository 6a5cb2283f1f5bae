//! # Observability
//!
//! - `metrics`: in-process Prometheus registry served on `/metrics`
//! - `pushgateway`: session and host metrics pushed to a Pushgateway

pub mod metrics;
pub mod pushgateway;

pub use pushgateway::{MetricBatch, MetricsSink, PushgatewaySink, RecordingMetricsSink};
