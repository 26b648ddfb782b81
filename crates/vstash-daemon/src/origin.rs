//! Client origin for request logging.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Best-effort address of the caller.
///
/// Taken from `CF-Connecting-IP`, then the first `X-Forwarded-For` entry,
/// then the socket peer. Only used for logs; never trusted for access
/// decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

impl ClientOrigin {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(ip) = header(CF_CONNECTING_IP) {
            return Self(ip.to_string());
        }
        if let Some(first) = header(X_FORWARDED_FOR)
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Self(first.to_string());
        }
        match peer {
            Some(addr) => Self(addr.ip().to_string()),
            None => Self(Self::UNKNOWN.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}
