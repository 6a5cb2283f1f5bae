//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::constants::CONTROLLER_NAME;
use crate::controller::client::KubeClusterApi;
use crate::controller::events::KubeEventRecorder;
use crate::controller::reconciler::{Reconciler, ReconcilerSettings};
use crate::controller::server::{start_server, ServerState};
use crate::controller::task::CrdTaskResolver;
use crate::observability::{self, PushgatewaySink};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Validated controller configuration
    pub config: ControllerConfig,
    /// Session reconciler shared by the queue workers
    pub reconciler: Arc<Reconciler<KubeClusterApi>>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber; `json` switches to JSON lines
pub fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stash_controller=info".into());

    let result = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Install the ring crypto provider for rustls 0.23
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Configuration validation
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize(
    config: ControllerConfig,
    server_config: ServerConfig,
) -> Result<InitializationResult> {
    install_crypto_provider();
    init_tracing(&config.log_format);

    info!("Starting Stash BackupSession controller v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid controller configuration: {e}"))?;

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());

    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let api = Arc::new(KubeClusterApi::new(client.clone()));
    let recorder = Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME));
    let tasks = Arc::new(CrdTaskResolver::new(Arc::clone(&api)));

    let mut reconciler = Reconciler::new(
        api,
        recorder,
        tasks,
        ReconcilerSettings::from_config(&config),
    );
    match &config.pushgateway_url {
        Some(url) => {
            let sink = PushgatewaySink::new(url)
                .with_context(|| format!("Invalid Pushgateway URL '{url}'"))?;
            info!("Pushing session metrics to {}", url);
            reconciler = reconciler.with_metrics(Arc::new(sink));
        }
        None => info!("Pushgateway disabled, session metrics are not pushed"),
    }

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        reconciler: Arc::new(reconciler),
        server_state,
    })
}

/// Wait for the HTTP listener to bind
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_server_ready_fails_when_server_exits() {
        let state = Arc::new(ServerState::default());
        let handle = tokio::spawn(async {});
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }

        let err = wait_for_server_ready(&state, &handle, &ServerConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn test_wait_for_server_ready_returns_once_ready() {
        let state = Arc::new(ServerState::default());
        state.mark_listening();
        let handle = tokio::spawn(futures::future::pending::<()>());

        wait_for_server_ready(&state, &handle, &ServerConfig::default())
            .await
            .unwrap();
        handle.abort();
    }
}
