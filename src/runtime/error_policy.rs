//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch streams.
//! Reconciliation errors are handled by the work queue; this module only
//! deals with errors surfaced by the informers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, warn, Instrument};

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 404: CRD missing or the watched object was deleted
    NotFound,
    /// 401: token expired or RBAC revoked
    Unauthorized,
    /// 410: resource version too old, the watcher relists
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    Other,
}

/// Classify a watch error from its debug rendering
pub fn classify_watch_error(error: &str) -> WatchErrorClass {
    // 404 before 401: a plain-text 404 body surfaces as a serde error mentioning WatchFailed
    let is_not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if is_not_found {
        return WatchErrorClass::NotFound;
    }
    if error.contains("401") || error.contains("Unauthorized") {
        return WatchErrorClass::Unauthorized;
    }
    if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        return WatchErrorClass::Expired;
    }
    if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        return WatchErrorClass::TooManyRequests;
    }
    WatchErrorClass::Other
}

/// Handle a watch stream error with the delay its class calls for
///
/// `backoff` holds the current 429 backoff in milliseconds and doubles on
/// every consecutive 429 up to `max_backoff_ms`; the caller resets it once
/// events flow again.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> WatchErrorClass {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    async {
        let class = classify_watch_error(error_string);
        match class {
            WatchErrorClass::Unauthorized => {
                error!(
                    "Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
                );
                error!("Verify the controller ClusterRole and its binding still exist:");
                error!(
                    "   kubectl auth can-i watch backupsessions.stash.appscode.com --as=system:serviceaccount:<namespace>:stash-operator --all-namespaces"
                );
                warn!(
                    "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                    watch_restart_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
            }
            WatchErrorClass::Expired => {
                warn!(error_type = "410", "watch resource version expired, relisting");
            }
            WatchErrorClass::TooManyRequests => {
                let current = backoff.load(Ordering::Relaxed);
                warn!(
                    "API server storage reinitializing (429), backing off for {}ms...",
                    current
                );
                tokio::time::sleep(Duration::from_millis(current)).await;
                backoff.store(
                    current.saturating_mul(2).min(max_backoff_ms),
                    Ordering::Relaxed,
                );
            }
            WatchErrorClass::NotFound => {
                warn!(
                    "Resource not found (404) - the Stash CRDs may not be installed. Error: {}",
                    error_string
                );
                tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
            }
            WatchErrorClass::Other => {
                error!("Watch stream error: {}", error_string);
                tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
            }
        }
        class
    }
    .instrument(error_span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { code: 404, reason: \"NotFound\" })"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            classify_watch_error("WatchFailed(Api(ErrorResponse { code: 401 }))"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchError(ErrorResponse { message: \"too old resource version\" })"),
            WatchErrorClass::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorClass::TooManyRequests
        );
        assert_eq!(
            classify_watch_error("connection reset by peer"),
            WatchErrorClass::Other
        );
    }

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            classify_watch_error("WatchFailed: invalid type: integer `404`, Unauthorized"),
            WatchErrorClass::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_requests_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1000);
        handle_watch_stream_error("code: 429", &backoff, 3000, 5).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 2000);
        handle_watch_stream_error("code: 429", &backoff, 3000, 5).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_does_not_touch_backoff() {
        let backoff = AtomicU64::new(1000);
        let class = handle_watch_stream_error("410 Gone", &backoff, 3000, 5).await;
        assert_eq!(class, WatchErrorClass::Expired);
        assert_eq!(backoff.load(Ordering::Relaxed), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_handling_runs_on_spawned_tasks() {
        static BACKOFF: AtomicU64 = AtomicU64::new(1000);
        let handle = tokio::spawn(handle_watch_stream_error("code: 429", &BACKOFF, 3000, 5));
        assert_eq!(handle.await.unwrap(), WatchErrorClass::TooManyRequests);
        assert_eq!(BACKOFF.load(Ordering::Relaxed), 2000);
    }
}
