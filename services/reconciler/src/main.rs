//! prefixd reconciler
//!
//! Long-lived background component: subscribes to config mutations and
//! reconciles prefix requests against the IPAM backend until the host
//! closes the subscription.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prefixd_ipam::{BackendConfig, HttpConnector};
use prefixd_reconciler::config::Config;
use prefixd_reconciler::engine::Engine;
use prefixd_reconciler::store::memory::MemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting prefixd reconciler");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        backend = %config.backend,
        host = %config.backend_host,
        port = config.backend_port,
        "Configuration loaded"
    );

    // In-process store for now; a production deployment embeds the engine
    // against the host's config store
    let store = MemoryStore::new();
    store.seed_backend(
        &config.backend,
        &BackendConfig {
            host: config.backend_host.clone(),
            port: config.backend_port,
            username: config.backend_username.clone(),
            password: config.backend_password.clone(),
        },
    );

    let subscription = store.subscribe()?;

    let engine = Engine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(HttpConnector),
        config.backend.clone(),
    );

    let loop_handle = tokio::spawn(async move {
        engine.run(Box::new(subscription)).await;
    });

    // The subscription close is the engine's shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing subscription");
    store.close();
    loop_handle.await?;

    info!("Reconciler stopped");
    Ok(())
}
