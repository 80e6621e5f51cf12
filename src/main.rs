//! Mini Cache sweeper
//!
//! Periodically removes expired entries from the configured cache backend.
//! Useful next to applications that write to a filesystem cache but never
//! call `clean` themselves.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mini_cache::{spawn_sweep_task, Cache, CacheConfig, Driver};

/// Main entry point for the sweeper.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the configured cache driver
/// 4. Start the background sweep task
/// 5. Wait for SIGINT/SIGTERM, then stop the sweep task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Mini Cache sweeper");

    let config = CacheConfig::from_env().context("loading cache configuration")?;
    let cache = Arc::new(Cache::from_config(&config).context("building cache driver")?);
    info!(
        "Configuration loaded: driver={}, lifetime={}s, enabled={}, sweep_interval={}s",
        cache.driver().kind(),
        cache.driver().lifetime(),
        cache.is_enabled(),
        config.sweep_interval
    );

    if !cache.is_enabled() {
        warn!("Cache is disabled, sweeps will be skipped");
    }

    let sweep_handle = spawn_sweep_task(cache.clone(), config.sweep_interval);
    info!("Background sweep task started");

    shutdown_signal().await?;

    sweep_handle.abort();
    warn!("Sweep task aborted");

    let stats = cache.stats();
    info!(sweeps = stats.sweeps, "Sweeper shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("installing Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        res = terminate => {
            res?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
    Ok(())
}
