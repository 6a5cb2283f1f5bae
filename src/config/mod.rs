//! # Configuration
//!
//! Controller and HTTP server settings, loaded from environment variables.
//! Environment variables are populated from a ConfigMap using `envFrom` in the deployment.

mod controller;
mod server;

pub use controller::{ControllerConfig, ProvisioningFailurePolicy};
pub use server::ServerConfig;

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str) -> bool {
    let v_lower = value.to_lowercase();
    v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
}
