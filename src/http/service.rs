//! Rate limit HTTP handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::client_ip::{client_identifier_or_peer, PeerAddr};
use super::middleware::SERVICE_THROTTLE_BUCKET;
use super::rejection::{apply_quota_headers, Throttled};
use crate::ratelimit::{Preset, RateLimitConfig, RateLimitKey, RateLimiter};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The rate limiter instance
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create state around a limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

/// Body of a check request.
///
/// Either `preset` or both `limit` and `windowInSeconds` select the policy.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// Action bucket, e.g. `auth`
    pub bucket: String,
    /// Actor identifier; derived from the request when absent
    #[serde(default)]
    pub discriminator: Option<String>,
    /// Named policy
    #[serde(default)]
    pub preset: Option<String>,
    /// Explicit limit
    #[serde(default)]
    pub limit: Option<u32>,
    /// Explicit window
    #[serde(default)]
    pub window_in_seconds: Option<u64>,
}

impl CheckRequest {
    fn policy(&self) -> Result<RateLimitConfig, ApiError> {
        match (&self.preset, self.limit, self.window_in_seconds) {
            (Some(name), None, None) => name
                .parse::<Preset>()
                .map(|preset| preset.config())
                .map_err(|e| ApiError::BadRequest(e.to_string())),
            (None, Some(limit), Some(window)) => RateLimitConfig::new(limit, window)
                .map_err(|e| ApiError::BadRequest(e.to_string())),
            _ => Err(ApiError::BadRequest(
                "provide either preset or limit and windowInSeconds".to_string(),
            )),
        }
    }
}

/// Handler errors.
#[derive(Debug)]
pub enum ApiError {
    /// The request could not be interpreted
    BadRequest(String),
    /// The attempt was rejected by the limiter
    Throttled(Throttled),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response()
            }
            ApiError::Throttled(throttled) => throttled.into_response(),
        }
    }
}

/// Record an attempt and report the decision.
///
/// Admitted attempts answer 200 with the result and quota headers; rejected
/// attempts answer with the standard 429 response.
#[instrument(skip_all)]
pub async fn check_rate_limit(
    State(state): State<AppState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    if request.bucket.trim().is_empty() {
        warn!("Received rate limit check with empty bucket");
        return Err(ApiError::BadRequest("bucket is required".to_string()));
    }
    if request.bucket.trim() == SERVICE_THROTTLE_BUCKET {
        return Err(ApiError::BadRequest(format!(
            "bucket '{}' is reserved",
            SERVICE_THROTTLE_BUCKET
        )));
    }

    let config = request.policy()?;
    let discriminator = match request.discriminator.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => client_identifier_or_peer(&headers, peer),
    };
    let key = RateLimitKey::new(request.bucket.trim(), discriminator);

    debug!(key = %key, limit = config.limit(), window = config.window_secs(), "Processing rate limit check");

    let result = state.limiter.check(&key.to_string_key(), &config).await;

    info!(key = %key, success = result.success, remaining = result.remaining, "Rate limit decision made");

    if !result.success {
        return Err(ApiError::Throttled(Throttled(result)));
    }

    let mut response_headers = HeaderMap::new();
    apply_quota_headers(&mut response_headers, &result);
    Ok((response_headers, Json(result)).into_response())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
}

/// Liveness probe naming the active counter backend.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        backend: state.limiter.backend_name(),
    })
}
