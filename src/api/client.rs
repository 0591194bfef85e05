//! Request metadata for view ingest
//!
//! The client IP is taken from `X-Forwarded-For` (leftmost valid entry,
//! i.e. the originating client), then `X-Real-IP`, then the socket address
//! when the server was started with connect info.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// Best-effort client identity taken from the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl ClientMeta {
    pub fn from_headers(headers: &HeaderMap, socket_ip: Option<IpAddr>) -> Self {
        Self {
            ip: extract_client_ip(headers, socket_ip).map(|ip| ip.to_string()),
            user_agent: header_string(headers, header::USER_AGENT.as_str()),
            referrer: header_string(headers, header::REFERER.as_str()),
        }
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let socket_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self::from_headers(&parts.headers, socket_ip))
    }
}

/// Extract the client IP from forwarding headers, falling back to the socket
pub fn extract_client_ip(headers: &HeaderMap, socket_ip: Option<IpAddr>) -> Option<IpAddr> {
    extract_from_x_forwarded_for(headers)
        .or_else(|| extract_from_x_real_ip(headers))
        .or(socket_ip)
}

fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
    xff.split(',')
        .find_map(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_from_x_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse::<IpAddr>()
        .ok()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
