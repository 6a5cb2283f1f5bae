//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use crate::constants::*;
use crate::controller::job_template::ImageRef;
use std::str::FromStr;
use std::time::Duration;

/// What the reconciler does when provisioning a backup job fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningFailurePolicy {
    /// Any provisioning error marks the session Failed immediately
    #[default]
    FailFast,
    /// Transient API errors are retried in-line before the session is failed
    RetryTransient,
}

impl FromStr for ProvisioningFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "retry-transient" | "retrytransient" => Ok(Self::RetryTransient),
            other => Err(format!(
                "unknown provisioning failure policy '{other}', expected 'fail-fast' or 'retry-transient'"
            )),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Times a failing key is re-queued before it is dropped
    pub max_num_requeues: u32,
    /// Number of queue workers reconciling distinct sessions concurrently
    pub num_threads: usize,
    /// Registry hosting the Stash image used by volume-snapshot jobs
    pub docker_registry: String,
    /// Stash image tag (required)
    pub stash_image_tag: String,
    /// Write session status through the status subresource
    pub enable_status_subresource: bool,
    /// Pushgateway receiving session metrics; `None` disables pushing
    pub pushgateway_url: Option<String>,
    /// Behaviour on provisioning errors
    pub provisioning_failure_policy: ProvisioningFailurePolicy,
    /// In-line attempts for transient provisioning errors under `RetryTransient`
    pub provisioning_attempts: u32,
    /// Read-modify-write attempts when a write conflicts
    pub conflict_retries: u32,
    /// Per-key queue backoff base (milliseconds)
    pub queue_backoff_base_ms: u64,
    /// Per-key queue backoff cap (seconds)
    pub queue_backoff_max_secs: u64,
    /// Period between full re-enqueues of known sessions (seconds)
    pub resync_period_secs: u64,
    /// Watch error backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Watch error backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_num_requeues: DEFAULT_MAX_NUM_REQUEUES,
            num_threads: DEFAULT_NUM_THREADS,
            docker_registry: DEFAULT_DOCKER_REGISTRY.to_string(),
            stash_image_tag: String::new(),
            enable_status_subresource: true,
            pushgateway_url: Some(DEFAULT_PUSHGATEWAY_URL.to_string()),
            provisioning_failure_policy: ProvisioningFailurePolicy::FailFast,
            provisioning_attempts: DEFAULT_PROVISIONING_ATTEMPTS,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            queue_backoff_base_ms: DEFAULT_QUEUE_BACKOFF_BASE_MS,
            queue_backoff_max_secs: DEFAULT_QUEUE_BACKOFF_MAX_SECS,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let pushgateway_url = env_var_or_default_str("PUSHGATEWAY_URL", DEFAULT_PUSHGATEWAY_URL);
        let provisioning_failure_policy = std::env::var("PROVISIONING_FAILURE_POLICY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        Self {
            max_num_requeues: env_var_or_default("MAX_NUM_REQUEUES", DEFAULT_MAX_NUM_REQUEUES),
            num_threads: env_var_or_default("NUM_THREADS", DEFAULT_NUM_THREADS),
            docker_registry: env_var_or_default_str("DOCKER_REGISTRY", DEFAULT_DOCKER_REGISTRY),
            stash_image_tag: env_var_or_default_str("STASH_IMAGE_TAG", ""),
            enable_status_subresource: env_var_or_default_bool("ENABLE_STATUS_SUBRESOURCE", true),
            pushgateway_url: (!pushgateway_url.trim().is_empty()).then_some(pushgateway_url),
            provisioning_failure_policy,
            provisioning_attempts: env_var_or_default(
                "PROVISIONING_ATTEMPTS",
                DEFAULT_PROVISIONING_ATTEMPTS,
            ),
            conflict_retries: env_var_or_default("CONFLICT_RETRIES", DEFAULT_CONFLICT_RETRIES),
            queue_backoff_base_ms: env_var_or_default(
                "QUEUE_BACKOFF_BASE_MS",
                DEFAULT_QUEUE_BACKOFF_BASE_MS,
            ),
            queue_backoff_max_secs: env_var_or_default(
                "QUEUE_BACKOFF_MAX_SECS",
                DEFAULT_QUEUE_BACKOFF_MAX_SECS,
            ),
            resync_period_secs: env_var_or_default("RESYNC_PERIOD_SECS", DEFAULT_RESYNC_PERIOD_SECS),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.stash_image_tag.trim().is_empty() {
            return Err("image-tag must be specified (STASH_IMAGE_TAG)".to_string());
        }
        if self.num_threads == 0 {
            return Err("NUM_THREADS must be at least 1".to_string());
        }
        if self.provisioning_attempts == 0 {
            return Err("PROVISIONING_ATTEMPTS must be at least 1".to_string());
        }
        Ok(())
    }

    /// Stash image used by volume-snapshot jobs
    pub fn image(&self) -> ImageRef {
        ImageRef {
            registry: self.docker_registry.clone(),
            image: IMAGE_STASH.to_string(),
            tag: self.stash_image_tag.clone(),
        }
    }

    pub fn queue_backoff_base(&self) -> Duration {
        Duration::from_millis(self.queue_backoff_base_ms)
    }

    pub fn queue_backoff_max(&self) -> Duration {
        Duration::from_secs(self.queue_backoff_max_secs)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_upstream_operator() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_num_requeues, 5);
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.docker_registry, "appscode");
        assert!(config.enable_status_subresource);
        assert_eq!(
            config.provisioning_failure_policy,
            ProvisioningFailurePolicy::FailFast
        );
    }

    #[test]
    fn test_image_tag_is_required() {
        let mut config = ControllerConfig::default();
        assert!(config.validate().is_err());

        config.stash_image_tag = "v0.9.0".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.image().to_string(), "appscode/stash:v0.9.0");
    }

    #[test]
    fn test_provisioning_failure_policy_parsing() {
        assert_eq!(
            "fail-fast".parse::<ProvisioningFailurePolicy>(),
            Ok(ProvisioningFailurePolicy::FailFast)
        );
        assert_eq!(
            "Retry-Transient".parse::<ProvisioningFailurePolicy>(),
            Ok(ProvisioningFailurePolicy::RetryTransient)
        );
        assert!("sometimes".parse::<ProvisioningFailurePolicy>().is_err());
    }
}
