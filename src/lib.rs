//! Practice Limiter - fixed-window rate limiting for the practice platform
//!
//! Login, registration, password reset and API calls are throttled per client
//! through a shared Redis counter store. When no shared store is configured, or
//! it cannot be reached, the same algorithm runs against an in-process store so
//! requests are never failed because of the limiter itself.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
