//! Per-client throttling of the service's own routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::debug;

use super::client_ip::{client_identifier_or_peer, PeerAddr};
use super::rejection::service_rejection_response_at;
use super::service::AppState;
use crate::ratelimit::{Preset, RateLimitKey};

/// Bucket holding the service's own per-client counters.
///
/// Kept apart from every bucket callers can name, so guarding the service
/// never spends a caller's `api` quota.
pub const SERVICE_THROTTLE_BUCKET: &str = "service";

/// Limit each client to the `api` preset's rate across the wrapped routes.
///
/// Rejected requests never reach the handler and get a
/// `SERVICE_RATE_LIMIT_EXCEEDED` body. Admitted responses pass through
/// untouched, so quota headers set by the handler describe the caller's
/// bucket.
pub async fn throttle(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let PeerAddr(peer) = PeerAddr::from_extensions(request.extensions());
    let client = client_identifier_or_peer(request.headers(), peer);
    let key = RateLimitKey::new(SERVICE_THROTTLE_BUCKET, client);

    let result = state
        .limiter
        .check(&key.to_string_key(), &Preset::Api.config())
        .await;

    if !result.success {
        debug!(key = %key, path = %request.uri().path(), "Throttling service caller");
        return service_rejection_response_at(&result, Utc::now());
    }

    next.run(request).await
}
