//! HTTP surface: request helpers and the rate limit service.

mod client_ip;
mod middleware;
mod rejection;
mod server;
mod service;

pub use client_ip::{client_identifier, client_identifier_or_peer, PeerAddr, UNKNOWN_CLIENT};
pub use middleware::{throttle, SERVICE_THROTTLE_BUCKET};
pub use rejection::{
    apply_quota_headers, rejection_response, rejection_response_at, service_rejection_response_at,
    RejectionBody, Throttled, RATE_LIMIT_ERROR_CODE, RATE_LIMIT_MESSAGE,
    SERVICE_THROTTLE_ERROR_CODE, SERVICE_THROTTLE_MESSAGE,
};
pub use server::{build_router, spawn_sweeper, HttpServer};
pub use service::{check_rate_limit, health, ApiError, AppState, CheckRequest};
