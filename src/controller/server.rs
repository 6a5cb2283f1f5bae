//! # Health Server
//!
//! Serves the controller's own Prometheus registry and the liveness and readiness endpoints.
//!
//! - `/metrics`: reconcile, queue and provisioning metrics in text format
//! - `/healthz`: liveness, 200 as long as the process answers
//! - `/readyz`: 200 once the listener is bound and the BackupSession informer
//!   has listed every session; 503 with the missing condition otherwise, and
//!   again while shutting down
//!
//! Port comes from `METRICS_PORT` (default 5000).

use crate::observability::metrics::REGISTRY;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Readiness conditions shared by the server, bootstrap and watch loop
#[derive(Debug, Default)]
pub struct ServerState {
    listening: AtomicBool,
    synced: AtomicBool,
    stopping: AtomicBool,
}

impl ServerState {
    pub fn mark_listening(&self) {
        self.listening.store(true, Ordering::Release);
    }

    /// The BackupSession store holds a complete list
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.readiness().is_ok()
    }

    /// `Err` names the first unmet condition
    pub fn readiness(&self) -> Result<(), &'static str> {
        if self.stopping.load(Ordering::Acquire) {
            return Err("shutting down");
        }
        if !self.is_listening() {
            return Err("http listener not bound");
        }
        if !self.synced.load(Ordering::Acquire) {
            return Err("waiting for BackupSession informer sync");
        }
        Ok(())
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `port` and serve until the process exits
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    state.mark_listening();

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Text exposition of the controller registry
pub fn render_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string().into_bytes(),
            )
        }
    }
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.readiness() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn readyz_response(state: &Arc<ServerState>) -> (StatusCode, String) {
        let response = readyz(State(Arc::clone(state))).await.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_ready_after_listener_and_informer_sync() {
        let state = Arc::new(ServerState::default());
        assert_eq!(
            readyz_response(&state).await,
            (StatusCode::SERVICE_UNAVAILABLE, "http listener not bound".to_string())
        );

        state.mark_listening();
        assert_eq!(
            readyz_response(&state).await,
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "waiting for BackupSession informer sync".to_string()
            )
        );

        state.mark_synced();
        assert_eq!(readyz_response(&state).await, (StatusCode::OK, "ok".to_string()));
    }

    #[tokio::test]
    async fn test_not_ready_while_stopping() {
        let state = Arc::new(ServerState::default());
        state.mark_listening();
        state.mark_synced();
        state.mark_stopping();

        assert!(!state.is_ready());
        assert_eq!(readyz_response(&state).await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rendered_metrics_include_reconciliations() {
        // registration may already have happened in another test
        let _ = crate::observability::metrics::register_metrics();
        crate::observability::metrics::increment_reconciliations();
        let body = String::from_utf8(render_metrics().unwrap()).unwrap();
        assert!(body.contains("stash_controller_reconciliations_total"), "{body}");
    }
}
