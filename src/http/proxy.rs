//! Reverse proxy forwarding.
//!
//! # Responsibilities
//! - Resolve the next endpoint of the bound service
//! - Rewrite the request target, keeping path, query, method, headers, body
//! - Stream the backend response back unchanged
//! - Map transport failures to 502/504 so the breaker sees them as 5xx
//! - Answer request-body failures (size limit, aborted upload) with 4xx, since
//!   they are the caller's fault and must not count against the backend
//!
//! Preflight `OPTIONS` requests are answered here with an empty 200; the
//! backends do not implement CORS.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        uri::Uri,
        Method, Request, StatusCode, Version,
    },
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::http::request::{peer_addr, request_id};
use crate::http::response::GatewayError;
use crate::load_balancer::ServiceRegistry;
use crate::observability::metrics;
use crate::routing::pipeline::Terminal;

/// Outbound HTTP client shared by all forwarders.
pub type UpstreamClient = Client<HttpConnector, Body>;

/// Build the outbound client with a connect timeout.
pub fn upstream_client(connect_timeout: Duration) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Terminal pipeline stage: forwards to one logical service.
#[derive(Clone)]
pub struct Forwarder {
    service: String,
    registry: Arc<ServiceRegistry>,
    client: UpstreamClient,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(
        service: impl Into<String>,
        registry: Arc<ServiceRegistry>,
        client: UpstreamClient,
        timeout: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            registry,
            client,
            timeout,
        }
    }

    /// Send `request` to `target` and return the backend's response.
    pub async fn forward(&self, request: Request<Body>, target: &Url) -> Result<Response, GatewayError> {
        let request_id = request_id(&request);
        let client_ip = peer_addr(&request).map(|addr| addr.ip().to_string());
        let (mut parts, body) = request.into_parts();

        let uri = upstream_uri(target, &parts.uri).ok_or_else(|| {
            tracing::error!(request_id = %request_id, endpoint = %target, "Cannot build upstream URI");
            GatewayError::UpstreamUnreachable
        })?;

        let original_host = parts.headers.get(header::HOST).cloned();
        strip_hop_by_hop(&mut parts.headers);
        if let Some(authority) = uri.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(header::HOST, host);
            }
        }
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut parts.headers, &ip);
        }

        parts.uri = uri;
        parts.version = Version::HTTP_11;
        let upstream_request = Request::from_parts(parts, body);

        tracing::debug!(
            request_id = %request_id,
            service = %self.service,
            endpoint = %target,
            uri = %upstream_request.uri(),
            "Forwarding request"
        );

        match tokio::time::timeout(self.timeout, self.client.request(upstream_request)).await {
            Ok(Ok(response)) => Ok(into_downstream(response)),
            Ok(Err(e)) => {
                if let Some(err) = request_body_error(&e) {
                    tracing::warn!(
                        request_id = %request_id,
                        service = %self.service,
                        error = %e,
                        "Request body failed while forwarding"
                    );
                    return Err(err);
                }
                tracing::error!(
                    request_id = %request_id,
                    service = %self.service,
                    endpoint = %target,
                    error = %e,
                    "Upstream error"
                );
                metrics::record_upstream_error(&self.service, "transport");
                Err(GatewayError::UpstreamUnreachable)
            }
            Err(_) => {
                tracing::error!(
                    request_id = %request_id,
                    service = %self.service,
                    endpoint = %target,
                    timeout = ?self.timeout,
                    "Upstream timed out"
                );
                metrics::record_upstream_error(&self.service, "timeout");
                Err(GatewayError::UpstreamTimeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Terminal for Forwarder {
    async fn call(&self, request: Request<Body>) -> Response {
        if request.method() == Method::OPTIONS {
            return StatusCode::OK.into_response();
        }

        let Some(endpoint) = self.registry.next_endpoint(&self.service) else {
            tracing::warn!(service = %self.service, "No endpoints registered");
            return GatewayError::NoEndpoint(self.service.clone()).into_response();
        };

        match self.forward(request, &endpoint).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}

/// Classify a send error caused by the inbound request body.
///
/// The body limit surfaces as `LengthLimitError` somewhere in the source
/// chain; any other body failure is a user error inside hyper.
fn request_body_error(error: &(dyn StdError + 'static)) -> Option<GatewayError> {
    let mut user_error = false;
    let mut source = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return Some(GatewayError::PayloadTooLarge);
        }
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            user_error |= hyper_err.is_user();
        }
        source = err.source();
    }
    user_error.then_some(GatewayError::RequestBody)
}

/// Relay a backend response, streaming its body.
fn into_downstream(response: Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

/// Join the endpoint base with the inbound path and query.
fn upstream_uri(target: &Url, original: &Uri) -> Option<Uri> {
    let host = target.host_str()?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let base = target.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", target.scheme(), authority, base, path_and_query)
        .parse()
        .ok()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    #[test]
    fn rewrites_authority_and_keeps_path_and_query() {
        let target = Url::parse("http://go-api:8080").unwrap();
        let original: Uri = "/api/v1/data/housing?page=2".parse().unwrap();
        assert_eq!(
            upstream_uri(&target, &original).unwrap(),
            "http://go-api:8080/api/v1/data/housing?page=2"
        );
    }

    #[test]
    fn endpoint_base_path_is_prefixed() {
        let target = Url::parse("http://10.0.0.5:8081/internal/").unwrap();
        let original: Uri = "/api/v1/process/run".parse().unwrap();
        assert_eq!(
            upstream_uri(&target, &original).unwrap(),
            "http://10.0.0.5:8081/internal/api/v1/process/run"
        );
    }

    #[test]
    fn strips_hop_by_hop_and_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret-hop", HeaderValue::from_static("1"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-secret-hop").is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer t");
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1");
        append_forwarded_for(&mut headers, "10.0.0.2");
        assert_eq!(headers.get(&X_FORWARDED_FOR).unwrap(), "10.0.0.1, 10.0.0.2");
    }

    fn forwarder(registry: Arc<ServiceRegistry>) -> Forwarder {
        Forwarder::new(
            "svc",
            registry,
            upstream_client(Duration::from_millis(200)),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn options_is_answered_locally() {
        let registry = Arc::new(ServiceRegistry::new());
        // Unroutable endpoint: any attempt to forward would fail.
        registry.register("svc", vec![Url::parse("http://127.0.0.1:1").unwrap()]);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/data/x")
            .body(Body::empty())
            .unwrap();
        let response = forwarder(registry).call(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn unknown_service_is_unavailable() {
        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let response = forwarder(Arc::new(ServiceRegistry::new())).call(request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn body_limit_error_is_the_callers_fault() {
        use http_body_util::{BodyExt, Limited};

        let err = Limited::new(Body::from("0123456789abcdef"), 4)
            .collect()
            .await
            .unwrap_err();
        let wrapped = axum::Error::new(err);

        assert!(matches!(
            request_body_error(&wrapped),
            Some(GatewayError::PayloadTooLarge)
        ));
    }

    #[test]
    fn other_errors_are_not_body_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(request_body_error(&io).is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_bad_gateway() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register("svc", vec![Url::parse("http://127.0.0.1:1").unwrap()]);

        let mut request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = forwarder(registry).call(request).await;
        assert!(response.status().is_server_error());
    }
}
