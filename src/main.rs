//! Tiered Cache host process
//!
//! Runs a cache context over file-backed durable storage with periodic
//! maintenance until SIGINT/SIGTERM, then flushes pending durable writes.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_cache::persistence::FilePersistence;
use tiered_cache::{spawn_cleanup_task, CacheContext, Config};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open file-backed durable storage
/// 4. Build the cache context
/// 5. Start background maintenance task
/// 6. Wait for SIGINT/SIGTERM, then flush and exit
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiered cache");

    let config = Config::from_env();
    info!(
        max_entries = config.max_entries,
        default_ttl_ms = config.default_ttl_ms,
        cleanup_interval_ms = config.cleanup_interval_ms,
        persistence_dir = %config.persistence_dir.display(),
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.persistence_dir)
        .await
        .with_context(|| format!("creating {}", config.persistence_dir.display()))?;
    let adapter = Arc::new(FilePersistence::new(config.persistence_dir.clone()));

    let interval = config.cleanup_interval();
    let context = CacheContext::from_config(config, adapter).context("building cache context")?;

    let cleanup_handle = spawn_cleanup_task(context.clone(), interval);
    info!("Background maintenance task started");

    shutdown_signal().await?;

    cleanup_handle.abort();
    warn!("Maintenance task aborted");

    context.flush().await;
    let stats = context.stats().await;
    info!(
        entries = stats.total_entries,
        hits = stats.hits,
        misses = stats.misses,
        "Shutdown complete"
    );
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("installing Ctrl+C handler")?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("installing Ctrl+C handler")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
