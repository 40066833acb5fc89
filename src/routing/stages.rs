//! Policy stages: rate limiting, circuit breaking, authentication.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::http::request::{client_key, request_id};
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::routing::pipeline::{Next, Stage};
use crate::security::{Authenticator, RateLimiter};

/// Denies clients over their per-window budget with 429.
pub struct RateLimitStage {
    route: String,
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(route: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            route: route.into(),
            limiter,
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, request: Request<Body>, next: Next<'_>) -> Response {
        let client = client_key(&request);
        if self.limiter.allow(&client).await {
            return next.run(request).await;
        }

        let err = GatewayError::RateLimited;
        tracing::warn!(
            request_id = %request_id(&request),
            route = %self.route,
            client = %client,
            limit = self.limiter.limit(),
            window = ?self.limiter.window(),
            class = err.class().as_str(),
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(&self.route);
        err.into_response()
    }
}

/// Runs the rest of the chain under the service's breaker.
///
/// Any response with a 5xx status counts as a failure, including the
/// 502/504 the forwarder produces for transport errors.
pub struct BreakerStage {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerStage {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl Stage for BreakerStage {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn handle(&self, request: Request<Body>, next: Next<'_>) -> Response {
        let request_id = request_id(&request);
        let outcome = self
            .breaker
            .execute(|| async move {
                let response = next.run(request).await;
                if response.status().is_server_error() {
                    Err(response)
                } else {
                    Ok(response)
                }
            })
            .await;

        match outcome {
            Ok(response) | Err(BreakerError::Inner(response)) => response,
            Err(BreakerError::Open) => {
                tracing::debug!(
                    request_id = %request_id,
                    service = %self.breaker.name(),
                    "Circuit open, request rejected"
                );
                GatewayError::BreakerOpen.into_response()
            }
            Err(BreakerError::TooManyRequests) => {
                tracing::debug!(
                    request_id = %request_id,
                    service = %self.breaker.name(),
                    "Half-open trial capacity exhausted"
                );
                GatewayError::BreakerSaturated.into_response()
            }
        }
    }
}

/// Requires a valid bearer token and attaches the caller's identity.
///
/// Preflight `OPTIONS` requests carry no credentials and pass through.
pub struct AuthStage {
    authenticator: Arc<Authenticator>,
}

impl AuthStage {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next<'_>) -> Response {
        if request.method() == Method::OPTIONS {
            return next.run(request).await;
        }

        match self.authenticator.authenticate(&request) {
            Ok(context) => {
                tracing::debug!(
                    request_id = %request_id(&request),
                    user_id = %context.user_id,
                    "Authenticated"
                );
                request.extensions_mut().insert(context);
                next.run(request).await
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id(&request),
                    path = %request.uri().path(),
                    reason = e.reason(),
                    "Authentication failed"
                );
                metrics::record_auth_failure(e.reason());
                GatewayError::from(e).into_response()
            }
        }
    }
}
