//! # Pushgateway
//!
//! Session and host metrics pushed to a Prometheus Pushgateway.
//!
//! Backup pods are short-lived, so their outcome is pushed instead of
//! scraped. A [`MetricBatch`] is one push: a throwaway registry of gauges
//! plus the job name and grouping labels it is stored under. Pushing uses
//! `PUT`, replacing the previous batch of the same group.

use crate::controller::duration::parse_duration;
use crate::controller::status::{BackupOutput, RestoreOutput};
use crate::crd::{
    BackupConfiguration, BackupSessionPhase, BackupSessionStatus, HostPhase, RestoreSession,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// One gauge sample of a [`MetricBatch`]
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Metrics pushed together under one job and grouping key
#[derive(Debug)]
pub struct MetricBatch {
    pub job: String,
    pub grouping: Vec<(String, String)>,
    registry: Registry,
    gauges: BTreeMap<String, GaugeVec>,
    samples: Vec<Sample>,
}

impl MetricBatch {
    pub fn new(job: &str, grouping: Vec<(String, String)>) -> Self {
        Self {
            job: job.to_string(),
            grouping,
            registry: Registry::new(),
            gauges: BTreeMap::new(),
            samples: Vec::new(),
        }
    }

    /// Set gauge `name{labels}` to `value`
    ///
    /// Every sample of one gauge must use the same label names.
    pub fn set(
        &mut self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<()> {
        let gauge = match self.gauges.get(name) {
            Some(gauge) => gauge.clone(),
            None => {
                let names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
                let gauge = GaugeVec::new(Opts::new(name, help), &names)
                    .map_err(|e| Error::MetricsPush(e.to_string()))?;
                self.registry
                    .register(Box::new(gauge.clone()))
                    .map_err(|e| Error::MetricsPush(e.to_string()))?;
                self.gauges.insert(name.to_string(), gauge.clone());
                gauge
            }
        };
        let values: Vec<&str> = labels.iter().map(|(_, v)| *v).collect();
        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| Error::MetricsPush(e.to_string()))?
            .set(value);

        self.samples.push(Sample {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            value,
        });
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Text exposition of the batch
    pub fn encode(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| Error::MetricsPush(e.to_string()))
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(&self, batch: &MetricBatch) -> Result<()>;
}

/// Pushes batches to a Pushgateway over HTTP
#[derive(Debug, Clone)]
pub struct PushgatewaySink {
    url: String,
    client: reqwest::Client,
}

impl PushgatewaySink {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::MetricsPush(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn push_url(&self, batch: &MetricBatch) -> String {
        let mut url = format!("{}/metrics/job/{}", self.url, batch.job);
        for (label, value) in &batch.grouping {
            url.push('/');
            url.push_str(label);
            url.push('/');
            url.push_str(value);
        }
        url
    }
}

#[async_trait]
impl MetricsSink for PushgatewaySink {
    async fn push(&self, batch: &MetricBatch) -> Result<()> {
        let url = self.push_url(batch);
        let response = self
            .client
            .put(&url)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(batch.encode()?)
            .send()
            .await
            .map_err(|e| Error::MetricsPush(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "Pushgateway rejected metrics");
            return Err(Error::MetricsPush(format!("{url}: HTTP {status}: {error_text}")));
        }
        debug!(url = %url, samples = batch.samples().len(), "pushed metrics");
        Ok(())
    }
}

/// A batch captured by [`RecordingMetricsSink`]
#[derive(Debug, Clone)]
pub struct PushedBatch {
    pub job: String,
    pub grouping: Vec<(String, String)>,
    pub samples: Vec<Sample>,
}

impl PushedBatch {
    /// Value of the first sample named `name`
    pub fn value(&self, name: &str) -> Option<f64> {
        self.samples.iter().find(|s| s.name == name).map(|s| s.value)
    }
}

/// Keeps pushed batches in memory; can be told to fail
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    pushed: Mutex<Vec<PushedBatch>>,
    fail: AtomicBool,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pushed(&self) -> Vec<PushedBatch> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetricsSink {
    async fn push(&self, batch: &MetricBatch) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::MetricsPush("pushgateway unavailable".to_string()));
        }
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PushedBatch {
                job: batch.job.clone(),
                grouping: batch.grouping.clone(),
                samples: batch.samples().to_vec(),
            });
        Ok(())
    }
}

fn seconds(raw: Option<&str>) -> f64 {
    raw.and_then(|d| parse_duration(d).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

fn success(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss, reason = "byte and file counts fit a gauge")]
fn gauge_value(v: impl Into<i128>) -> f64 {
    v.into() as f64
}

/// Parse restic's human readable sizes (`10.5 MiB`, `42 B`)
pub fn parse_size(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * factor)
}

struct InvokerLabels {
    namespace: String,
    invoker_kind: &'static str,
    invoker_name: String,
    target_kind: String,
    target_name: String,
}

impl InvokerLabels {
    fn of_configuration(configuration: &BackupConfiguration) -> Self {
        let target = configuration.spec.target.as_ref().map(|t| &t.target_ref);
        Self {
            namespace: configuration.namespace().unwrap_or_default(),
            invoker_kind: "BackupConfiguration",
            invoker_name: configuration.name_any(),
            target_kind: target.map(|t| t.kind.clone()).unwrap_or_default(),
            target_name: target.map(|t| t.name.clone()).unwrap_or_default(),
        }
    }

    fn of_restore(session: &RestoreSession) -> Self {
        let target = session.spec.target.as_ref().map(|t| &t.target_ref);
        Self {
            namespace: session.namespace().unwrap_or_default(),
            invoker_kind: "RestoreSession",
            invoker_name: session.name_any(),
            target_kind: target.map(|t| t.kind.clone()).unwrap_or_default(),
            target_name: target.map(|t| t.name.clone()).unwrap_or_default(),
        }
    }

    fn pairs(&self) -> Vec<(&str, &str)> {
        vec![
            ("namespace", self.namespace.as_str()),
            ("invoker_kind", self.invoker_kind),
            ("invoker_name", self.invoker_name.as_str()),
            ("target_kind", self.target_kind.as_str()),
            ("target_name", self.target_name.as_str()),
        ]
    }

    fn grouping(&self) -> Vec<(String, String)> {
        vec![
            ("namespace".to_string(), self.namespace.clone()),
            ("invoker_name".to_string(), self.invoker_name.clone()),
        ]
    }
}

/// Session-level metrics of a finished backup
pub fn backup_session_metrics(
    job: &str,
    configuration: &BackupConfiguration,
    status: &BackupSessionStatus,
) -> Result<MetricBatch> {
    let invoker = InvokerLabels::of_configuration(configuration);
    let labels = invoker.pairs();
    let mut batch = MetricBatch::new(job, invoker.grouping());

    let failed_hosts = status
        .stats
        .iter()
        .filter(|h| h.phase == HostPhase::Failed)
        .count();
    let succeeded = status.phase == Some(BackupSessionPhase::Succeeded);

    batch.set(
        "stash_backup_session_success",
        "Indicates whether the entire backup session succeeded",
        &labels,
        success(succeeded),
    )?;
    batch.set(
        "stash_backup_session_duration_seconds",
        "Time taken to complete the entire backup session",
        &labels,
        seconds(status.session_duration.as_deref()),
    )?;
    batch.set(
        "stash_backup_session_total_hosts",
        "Number of hosts the backup session had to back up",
        &labels,
        gauge_value(status.total_hosts.unwrap_or_default()),
    )?;
    batch.set(
        "stash_backup_session_failed_hosts",
        "Number of hosts that failed to back up",
        &labels,
        gauge_value(u32::try_from(failed_hosts).unwrap_or(u32::MAX)),
    )?;
    Ok(batch)
}

/// Host-level metrics of one backup output, plus repository gauges
pub fn backup_host_metrics(
    job: &str,
    configuration: &BackupConfiguration,
    output: &BackupOutput,
) -> Result<MetricBatch> {
    let invoker = InvokerLabels::of_configuration(configuration);
    let mut batch = MetricBatch::new(job, invoker.grouping());

    for host in &output.host_backup_stats {
        let mut labels = invoker.pairs();
        labels.push(("host", host.hostname.as_str()));

        let mut totals = [0u64; 6];
        for snapshot in &host.snapshots {
            let files = snapshot.file_stats.clone().unwrap_or_default();
            let add = |v: Option<i64>| u64::try_from(v.unwrap_or_default()).unwrap_or_default();
            totals[0] += snapshot.total_size_bytes.unwrap_or_default();
            totals[1] += snapshot.uploaded_bytes.unwrap_or_default();
            totals[2] += add(files.total_files);
            totals[3] += add(files.new_files);
            totals[4] += add(files.modified_files);
            totals[5] += add(files.unmodified_files);
        }

        batch.set(
            "stash_backup_host_success",
            "Indicates whether the backup of the host succeeded",
            &labels,
            success(host.error_message().is_none()),
        )?;
        batch.set(
            "stash_backup_host_duration_seconds",
            "Time taken to back up the host",
            &labels,
            seconds(host.duration.as_deref()),
        )?;
        let counters = [
            ("stash_backup_host_size_bytes", "Total size of the backed up data"),
            ("stash_backup_host_uploaded_bytes", "Bytes uploaded to the repository"),
            ("stash_backup_host_files_total", "Total number of files backed up"),
            ("stash_backup_host_files_new", "Number of new files"),
            ("stash_backup_host_files_modified", "Number of modified files"),
            ("stash_backup_host_files_unmodified", "Number of unmodified files"),
        ];
        for ((name, help), value) in counters.into_iter().zip(totals) {
            batch.set(name, help, &labels, gauge_value(value))?;
        }
    }

    let repo = &output.repository_stats;
    if let Some(integrity) = repo.integrity {
        let labels = invoker.pairs();
        batch.set(
            "stash_repository_integrity",
            "Result of the repository integrity check",
            &labels,
            success(integrity),
        )?;
        if let Some(size) = repo.size.as_deref().and_then(parse_size) {
            batch.set(
                "stash_repository_size_bytes",
                "Size of the repository",
                &labels,
                size,
            )?;
        }
        batch.set(
            "stash_repository_snapshot_count",
            "Number of snapshots in the repository",
            &labels,
            gauge_value(repo.snapshot_count.unwrap_or_default()),
        )?;
        batch.set(
            "stash_repository_snapshots_removed_total",
            "Snapshots removed by the last retention cleanup",
            &labels,
            gauge_value(repo.snapshots_removed_on_last_cleanup.unwrap_or_default()),
        )?;
    }
    Ok(batch)
}

/// Host-level metrics of one restore output
pub fn restore_host_metrics(
    job: &str,
    session: &RestoreSession,
    output: &RestoreOutput,
) -> Result<MetricBatch> {
    let invoker = InvokerLabels::of_restore(session);
    let mut batch = MetricBatch::new(job, invoker.grouping());

    for host in &output.host_restore_stats {
        let mut labels = invoker.pairs();
        labels.push(("host", host.hostname.as_str()));
        batch.set(
            "stash_restore_host_success",
            "Indicates whether the restore of the host succeeded",
            &labels,
            success(host.error_message().is_none()),
        )?;
        batch.set(
            "stash_restore_host_duration_seconds",
            "Time taken to restore the host",
            &labels,
            seconds(host.duration.as_deref()),
        )?;
    }
    Ok(batch)
}
