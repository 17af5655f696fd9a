//! Client identification from inbound requests.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

/// Sentinel used when no client identifier can be found.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Forwarding headers checked for the client address, in priority order.
const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Best-effort client identifier from forwarding headers.
///
/// `x-forwarded-for` contributes its first non-empty entry. Falls back to
/// [`UNKNOWN_CLIENT`] when none of the headers carries a value.
pub fn client_identifier(headers: &HeaderMap) -> String {
    forwarded_client(headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Like [`client_identifier`], but prefers the socket peer address over the
/// sentinel when no forwarding header is present.
pub fn client_identifier_or_peer(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    forwarded_client(headers)
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Socket peer address, when the server was started with connect info.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<IpAddr>);

impl PeerAddr {
    /// Read the peer address from request extensions.
    pub fn from_extensions(extensions: &axum::http::Extensions) -> Self {
        PeerAddr(
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        )
    }
}

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PeerAddr::from_extensions(&parts.extensions))
    }
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    FORWARDING_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').map(str::trim).find(|v| !v.is_empty()))
            .map(ToOwned::to_owned)
    })
}
