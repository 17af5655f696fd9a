//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::middleware::throttle;
use super::service::{check_rate_limit, health, AppState};
use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimiter;

/// HTTP server for the rate limit service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Whether the service's own routes are throttled per client
    self_throttle: bool,
}

impl HttpServer {
    /// Create a new server around a limiter.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            addr,
            rate_limiter,
            self_throttle: false,
        }
    }

    /// Enable or disable per-client throttling of the service's own routes.
    pub fn with_self_throttle(mut self, enabled: bool) -> Self {
        self.self_throttle = enabled;
        self
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        build_router(self.rate_limiter.clone(), self.self_throttle)
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            backend = self.rate_limiter.backend_name(),
            self_throttle = self.self_throttle,
            "Starting HTTP server for rate limit service"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            LimiterError::Io(e)
        })
    }
}

/// Routes of the rate limit service.
pub fn build_router(rate_limiter: Arc<RateLimiter>, self_throttle: bool) -> Router {
    let state = AppState::new(rate_limiter);

    let router = Router::new()
        .route("/v1/ratelimit/check", post(check_rate_limit))
        .route("/healthz", get(health));

    let router = if self_throttle {
        router.layer(axum::middleware::from_fn_with_state(state.clone(), throttle))
    } else {
        router
    };

    router.with_state(state)
}

/// Periodically drop expired in-process counters until the process exits.
pub fn spawn_sweeper(rate_limiter: Arc<RateLimiter>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = rate_limiter.purge_expired();
            debug!(purged, tracked = rate_limiter.local_store().len(), "Swept in-memory counters");
        }
    })
}
