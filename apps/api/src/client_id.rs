use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

/// Identifier used when neither a forwarded header nor a peer address exists.
pub const FALLBACK_CLIENT_ID: &str = "127.0.0.1";

/// Stable throttle key for the caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(address)| address.ip());

        Ok(Self(resolve_client_id(&parts.headers, peer)))
    }
}

/// Resolves the caller: first `x-forwarded-for` entry, then the socket peer,
/// then the loopback fallback.
pub fn resolve_client_id(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    forwarded_client(headers)
        .or_else(|| peer.map(normalize_ip))
        .unwrap_or_else(|| FALLBACK_CLIENT_ID.to_owned())
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<IpAddr>()
                .map(normalize_ip)
                .unwrap_or_else(|_| value.to_owned())
        })
}

fn normalize_ip(address: IpAddr) -> String {
    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or_else(|| v6.to_string(), |v4| v4.to_string()),
        IpAddr::V4(v4) => v4.to_string(),
    }
}
