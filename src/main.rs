use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use practice_limiter::config::{AppConfig, LoggingConfig};
use practice_limiter::http::{spawn_sweeper, HttpServer};
use practice_limiter::ratelimit::RateLimiter;

/// Fixed-window rate limiting service for the practice platform.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file; `LIMITER__*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging);

    info!("Starting Practice Limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let rate_limiter = Arc::new(RateLimiter::from_config(&config.store)?);
    info!(backend = rate_limiter.backend_name(), "Rate limiter initialized");

    let sweeper = spawn_sweeper(
        rate_limiter.clone(),
        Duration::from_secs(config.memory.sweep_interval_secs),
    );

    let server = HttpServer::new(config.server.listen_addr, rate_limiter)
        .with_self_throttle(config.server.self_throttle);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    info!("Practice Limiter stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
