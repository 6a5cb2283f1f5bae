//! # Watch Loop
//!
//! Informers over BackupSessions and BackupConfigurations that feed session
//! keys into the work queue, plus a periodic resync of every known session.
//!
//! Sessions already in a terminal phase are never enqueued. A change to a
//! BackupConfiguration re-enqueues the non-terminal sessions that reference
//! it so a pause or resume is picked up without waiting for the resync.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::client::ClusterApi;
use crate::controller::queue::{run_workers, WorkQueue};
use crate::controller::reconciler::{ObjectKey, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{BackupConfiguration, BackupSession};
use crate::observability::metrics;
use crate::runtime::error_policy::handle_watch_stream_error;
use futures::StreamExt;
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::{reflector, watcher, WatchStreamExt};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run informers and queue workers until a shutdown signal arrives
pub async fn run_watch_loop<C: ClusterApi>(
    client: Client,
    reconciler: Arc<Reconciler<C>>,
    config: &ControllerConfig,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let queue = Arc::new(WorkQueue::<ObjectKey>::new(ExponentialBackoff::new(
        config.queue_backoff_base(),
        config.queue_backoff_max(),
    )));
    let workers = run_workers(
        &queue,
        &reconciler,
        config.num_threads,
        config.max_num_requeues,
    );

    let backoff_ms = AtomicU64::new(config.backoff_start_ms);

    let (reader, writer) = reflector::store::<BackupSession>();
    let synced = {
        let reader = reader.clone();
        let server_state = Arc::clone(&server_state);
        tokio::spawn(async move {
            if reader.wait_until_ready().await.is_ok() {
                info!("BackupSession informer synced");
                server_state.mark_synced();
            }
        })
    };
    let mut sessions = pin!(reflector(
        writer,
        watcher(
            Api::<BackupSession>::all(client.clone()),
            watcher::Config::default()
        )
    )
    .applied_objects());
    let mut configurations = pin!(watcher(
        Api::<BackupConfiguration>::all(client),
        watcher::Config::default()
    )
    .applied_objects());

    let period = config.resync_period();
    let mut resync = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut shutdown = pin!(shutdown_signal());

    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    async {
        info!("Starting controller watch loop...");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Received shutdown signal, initiating graceful shutdown...");
                    break;
                }
                Some(event) = sessions.next() => match event {
                    Ok(session) => {
                        backoff_ms.store(config.backoff_start_ms, Ordering::Relaxed);
                        if let Some(key) = session_key(&session) {
                            debug!(key = %key, "watch.event.backup_session");
                            queue.add(key);
                        }
                    }
                    Err(e) => {
                        handle_watch_stream_error(
                            &format!("{e:?}"),
                            &backoff_ms,
                            config.backoff_max_ms,
                            config.watch_restart_delay_secs,
                        )
                        .await;
                    }
                },
                Some(event) = configurations.next() => match event {
                    Ok(configuration) => {
                        backoff_ms.store(config.backoff_start_ms, Ordering::Relaxed);
                        let keys = sessions_of_configuration(&reader.state(), &configuration);
                        debug!(
                            configuration = %configuration.name_any(),
                            sessions = keys.len(),
                            "watch.event.backup_configuration"
                        );
                        keys.into_iter().for_each(|key| queue.add(key));
                    }
                    Err(e) => {
                        handle_watch_stream_error(
                            &format!("{e:?}"),
                            &backoff_ms,
                            config.backoff_max_ms,
                            config.watch_restart_delay_secs,
                        )
                        .await;
                    }
                },
                _ = resync.tick() => {
                    let keys: Vec<_> = reader
                        .state()
                        .iter()
                        .filter_map(|s| session_key(s))
                        .collect();
                    debug!(sessions = keys.len(), "resyncing sessions");
                    keys.into_iter().for_each(|key| queue.add(key));
                }
            }
            metrics::set_queue_depth(queue.len());
        }
    }
    .instrument(watch_span)
    .await;

    server_state.mark_stopping();
    synced.abort();
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    queue.shut_down();
    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            warn!("queue worker panicked: {}", e);
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Queue key of a session that still needs reconciling
pub fn session_key(session: &BackupSession) -> Option<ObjectKey> {
    if session.is_terminal() {
        return None;
    }
    ObjectKey::of(session)
}

/// Keys of the unfinished sessions created from `configuration`
pub fn sessions_of_configuration(
    sessions: &[Arc<BackupSession>],
    configuration: &BackupConfiguration,
) -> Vec<ObjectKey> {
    let namespace = configuration.namespace();
    let name = configuration.name_any();
    sessions
        .iter()
        .filter(|s| s.namespace() == namespace && s.configuration_name() == name)
        .filter_map(|s| session_key(s))
        .collect()
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
