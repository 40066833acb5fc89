//! Request identification.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the caller sent none
//! - Resolve the client key used for rate limiting

use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request};
use std::net::SocketAddr;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the request ID, in both directions.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Produces UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

/// Request ID of `request`, or "unknown".
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Identify the client: `X-Real-IP`, then the first `X-Forwarded-For`
/// entry, then the peer address of the connection.
pub fn client_key<B>(request: &Request<B>) -> String {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header("x-real-ip") {
        return ip.to_string();
    }
    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer_addr(request)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Peer address of the TCP connection, when the server recorded it.
pub fn peer_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}
