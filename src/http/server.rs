//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared components (counter store, registry, policies)
//! - Create the Axum router: `/health` plus the composed route table
//! - Wire up global middleware (request ID, tracing, panics, CORS, limits)
//! - Serve until shutdown, then drain for a bounded time

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::any::Any;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::validation::ValidationError;
use crate::config::{CorsConfig, GatewayConfig, StoreConfig, StoreKind};
use crate::http::proxy::upstream_client;
use crate::http::request::UuidRequestId;
use crate::http::response::{ErrorBody, GatewayError};
use crate::load_balancer::ServiceRegistry;
use crate::routing::{Policies, RouteTable};
use crate::security::{Authenticator, RateLimiter};
use crate::store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};

/// Failures while assembling the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ValidationError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    store: Arc<dyn CounterStore>,
    policies: Arc<Policies>,
    registry: Arc<ServiceRegistry>,
}

/// Open the counter store selected by `config`.
pub fn counter_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    Ok(match config.kind {
        StoreKind::Redis => Arc::new(RedisCounterStore::new(&config.redis_url, config.op_timeout())?),
        StoreKind::Memory => Arc::new(MemoryCounterStore::new()),
    })
}

impl GatewayServer {
    /// Create a server with the counter store named in `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let store = counter_store(&config.store)?;
        Self::with_store(config, store)
    }

    /// Create a server on an already-built counter store.
    pub fn with_store(config: GatewayConfig, store: Arc<dyn CounterStore>) -> Result<Self, ServerError> {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services)?);
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            &config.rate_limit,
            config.store.key_prefix.clone(),
        ));
        let authenticator = Arc::new(Authenticator::new(&config.auth));
        let policies = Arc::new(Policies::new(&config, limiter, authenticator));

        let upstream_timeout = config.timeouts.upstream();
        let routes = RouteTable::compose(
            &config.routes,
            &policies,
            registry.clone(),
            upstream_client(upstream_timeout),
            upstream_timeout,
        )?;

        let state = AppState {
            routes: Arc::new(routes),
        };
        let router = Self::build_router(&config, state);

        Ok(Self {
            router,
            config,
            store,
            policies,
            registry,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(cors_layer(&config.cors))
            .layer(TimeoutLayer::new(config.timeouts.request()));

        Router::new()
            .route("/health", get(health_handler).fallback(method_not_allowed))
            .fallback(gateway_handler)
            .with_state(state)
            .layer(middleware)
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight
    /// requests for at most `timeouts.drain_secs`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        if let Err(e) = self.store.ping().await {
            tracing::warn!(
                error = %e,
                "Counter store unreachable at startup, rate limiting will fail open"
            );
        }

        tracing::info!(
            address = %addr,
            services = ?self.registry.service_names(),
            breakers = self.policies.breakers.len(),
            "Gateway listening"
        );

        let drain = self.config.timeouts.drain();
        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let signal = async move {
            let _ = shutdown.recv().await;
            tracing::info!(drain = ?drain, "Shutdown signal received, draining connections");
            let _ = draining_tx.send(());
        };
        let deadline = async move {
            if draining_rx.await.is_ok() {
                tokio::time::sleep(drain).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .into_future();

        tokio::select! {
            result = server => result?,
            _ = deadline => {
                tracing::warn!(drain = ?drain, "Drain deadline reached, closing remaining connections");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "api-gateway" }))
}

async fn method_not_allowed(method: Method) -> GatewayError {
    GatewayError::MethodNotAllowed(method)
}

/// Dispatch to the route's pipeline, or answer 404.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    match state.routes.lookup(&path) {
        Some(pipeline) => pipeline.handle(request).await,
        None => {
            tracing::debug!(path = %path, method = %request.method(), "No route matched");
            GatewayError::NotFound(path).into_response()
        }
    }
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("internal server error", "internal server error")),
    )
        .into_response()
}

/// `*` mirrors the request origin, since credentials are allowed.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::LINK])
        .allow_credentials(true)
        .max_age(Duration::from_secs(config.max_age_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    fn server() -> GatewayServer {
        let mut config = GatewayConfig::default();
        config.store.kind = StoreKind::Memory;
        GatewayServer::new(config).unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = server().router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_is_fixed_json() {
        let (status, headers, body) =
            send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"service":"api-gateway","status":"healthy"}"#);
        assert!(headers.get("x-request-id").is_some());
    }

    #[tokio::test]
    async fn unmatched_path_is_404_json() {
        let (status, _, body) =
            send(Request::get("/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#"{"error":"not found","message":"no route for /nope"}"#);
    }

    #[tokio::test]
    async fn health_rejects_other_methods_with_json() {
        let (status, _, body) =
            send(Request::post("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body,
            r#"{"error":"method not allowed","message":"method POST not allowed"}"#
        );
    }

    #[tokio::test]
    async fn declared_oversize_body_is_413() {
        let request = Request::post("/api/v1/auth/login")
            .header(header::CONTENT_LENGTH, "5000000")
            .body(Body::from(vec![b'x'; 5_000_000]))
            .unwrap();
        let (status, _, _) = send(request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn caller_request_id_is_kept() {
        let request = Request::get("/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(request).await;
        assert_eq!(headers.get("x-request-id").unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn cors_preflight_mirrors_origin() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/data/housing")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn protected_route_without_token_is_401() {
        let (status, _, body) =
            send(Request::get("/api/v1/data/housing").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body,
            r#"{"error":"unauthorized","message":"missing authorization header"}"#
        );
    }

    #[test]
    fn bad_redis_url_fails_construction() {
        let mut config = GatewayConfig::default();
        config.store.redis_url = "nonsense".into();
        assert!(matches!(GatewayServer::new(config), Err(ServerError::Store(_))));
    }
}
