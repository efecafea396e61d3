//! Configuration for the reconciler.

use anyhow::Result;

/// Reconciler bootstrap configuration.
///
/// Only covers what the host injects at startup. Backend connection
/// settings live in the config store and are re-read every batch; the
/// values here just seed the development store's backend entry.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend entry name under `/services/ipam/backend`.
    pub backend: String,

    /// Backend host seeded into the development store.
    pub backend_host: String,

    /// Backend port seeded into the development store.
    pub backend_port: u16,

    /// Backend credentials seeded into the development store.
    pub backend_username: String,
    pub backend_password: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let backend =
            std::env::var("PREFIXD_BACKEND").unwrap_or_else(|_| "default".to_string());

        let backend_host =
            std::env::var("PREFIXD_BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let backend_port = std::env::var("PREFIXD_BACKEND_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1337);

        let backend_username =
            std::env::var("PREFIXD_BACKEND_USERNAME").unwrap_or_else(|_| "prefixd".to_string());

        let backend_password =
            std::env::var("PREFIXD_BACKEND_PASSWORD").unwrap_or_else(|_| "prefixd".to_string());

        Ok(Self {
            backend,
            backend_host,
            backend_port,
            backend_username,
            backend_password,
        })
    }
}
