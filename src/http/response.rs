//! Structured error responses.
//!
//! Every rejection the gateway produces itself is a JSON body of the form
//! `{"error": <short-code>, "message": <human text>}` with a matching status.

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::security::auth::AuthError;

/// Wire format of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// How a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A policy said no. Surfaced to the caller, never retried.
    PolicyRejection,
    /// Shared store unreachable. Recovered locally by failing open.
    DependencyUnavailable,
    /// The backend could not serve the request. Surfaced as 5xx and counted
    /// by the breaker.
    BackendFailure,
    /// Invalid settings. Fatal at startup.
    ConfigurationFailure,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::PolicyRejection => "policy_rejection",
            ErrorClass::DependencyUnavailable => "dependency_unavailable",
            ErrorClass::BackendFailure => "backend_failure",
            ErrorClass::ConfigurationFailure => "configuration_failure",
        }
    }
}

/// Per-request failures the gateway answers on behalf of a backend.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("too many requests")]
    RateLimited,
    #[error("circuit breaker is open")]
    BreakerOpen,
    #[error("circuit breaker is half-open")]
    BreakerSaturated,
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("no endpoints available for {0}")]
    NoEndpoint(String),
    #[error("upstream request failed")]
    UpstreamUnreachable,
    #[error("upstream request timed out after {0:?}")]
    UpstreamTimeout(Duration),
    #[error("no route for {0}")]
    NotFound(String),
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),
    #[error("request body exceeds the size limit")]
    PayloadTooLarge,
    #[error("request body could not be read")]
    RequestBody,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BreakerOpen
            | GatewayError::BreakerSaturated
            | GatewayError::NoEndpoint(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RequestBody => StatusCode::BAD_REQUEST,
        }
    }

    /// Short code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RateLimited => "rate limit exceeded",
            GatewayError::BreakerOpen
            | GatewayError::BreakerSaturated
            | GatewayError::NoEndpoint(_) => "service unavailable",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::UpstreamUnreachable => "bad gateway",
            GatewayError::UpstreamTimeout(_) => "gateway timeout",
            GatewayError::NotFound(_) => "not found",
            GatewayError::MethodNotAllowed(_) => "method not allowed",
            GatewayError::PayloadTooLarge => "payload too large",
            GatewayError::RequestBody => "bad request",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::RateLimited
            | GatewayError::BreakerOpen
            | GatewayError::BreakerSaturated
            | GatewayError::Unauthorized(_)
            | GatewayError::NotFound(_)
            | GatewayError::MethodNotAllowed(_)
            | GatewayError::PayloadTooLarge
            | GatewayError::RequestBody => ErrorClass::PolicyRejection,
            GatewayError::NoEndpoint(_)
            | GatewayError::UpstreamUnreachable
            | GatewayError::UpstreamTimeout(_) => ErrorClass::BackendFailure,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
