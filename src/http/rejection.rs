//! Standard responses for throttled requests.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ratelimit::RateLimitResult;

/// Machine-readable code carried by every throttling response.
pub const RATE_LIMIT_ERROR_CODE: &str = "RATE_LIMIT_EXCEEDED";

/// User-facing message for throttled requests.
pub const RATE_LIMIT_MESSAGE: &str = "Too many attempts. Please try again later.";

/// Code carried when the service turns away a caller of its own routes.
///
/// Distinct from [`RATE_LIMIT_ERROR_CODE`] so a client of `/v1/ratelimit/check`
/// can tell "the service is busy with you" from "your bucket is exhausted".
pub const SERVICE_THROTTLE_ERROR_CODE: &str = "SERVICE_RATE_LIMIT_EXCEEDED";

/// Message for requests rejected by the service's own throttle.
pub const SERVICE_THROTTLE_MESSAGE: &str = "Too many requests to the rate limit service.";

/// Body of a 429 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: &'static str,
    pub code: &'static str,
    pub retry_after: u64,
}

/// A rejected rate limit result, rendered as `429 Too Many Requests`.
#[derive(Debug, Clone)]
pub struct Throttled(pub RateLimitResult);

impl IntoResponse for Throttled {
    fn into_response(self) -> Response {
        rejection_response_at(&self.0, Utc::now())
    }
}

/// Build the 429 response for a rejected result.
pub fn rejection_response(result: &RateLimitResult) -> Response {
    rejection_response_at(result, Utc::now())
}

/// Build the 429 response as seen at `now`.
pub fn rejection_response_at(result: &RateLimitResult, now: DateTime<Utc>) -> Response {
    let retry_after = result.retry_after_secs(now);
    let mut headers = HeaderMap::new();
    apply_quota_headers(&mut headers, result);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));

    let body = RejectionBody {
        error: RATE_LIMIT_MESSAGE,
        code: RATE_LIMIT_ERROR_CODE,
        retry_after,
    };

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// Build the 429 returned when the service throttles its own callers.
///
/// Carries `Retry-After` but no `X-RateLimit-*` headers, which are reserved
/// for the quota a caller asked about.
pub fn service_rejection_response_at(result: &RateLimitResult, now: DateTime<Utc>) -> Response {
    let retry_after = result.retry_after_secs(now);
    let body = RejectionBody {
        error: SERVICE_THROTTLE_MESSAGE,
        code: SERVICE_THROTTLE_ERROR_CODE,
        retry_after,
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after))],
        Json(body),
    )
        .into_response()
}

/// Set `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.
pub fn apply_quota_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(result.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(result.reset.timestamp()),
    );
}
