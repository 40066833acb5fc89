//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! the defaults reproduce the three-backend deployment (auth, data, processing).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shared counter store used by the rate limiter.
    pub store: StoreConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings, applied to every backend service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Bearer credential verification.
    pub auth: AuthConfig,

    /// Cross-origin settings.
    pub cors: CorsConfig,

    /// Request limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Backend services and their endpoints.
    pub services: Vec<ServiceConfig>,

    /// Route groups mapping path prefixes to services.
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            store: StoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            auth: AuthConfig::default(),
            cors: CorsConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
            services: vec![
                ServiceConfig::new("auth-service", "http://auth-service:8082", "AUTH_SERVICE_URL"),
                ServiceConfig::new("go-api", "http://go-api:8080", "GO_API_SERVICE_URL"),
                ServiceConfig::new(
                    "python-processor",
                    "http://python-processor:8081",
                    "PYTHON_SERVICE_URL",
                ),
            ],
            routes: vec![
                // Login and registration happen before a token exists.
                RouteConfig {
                    name: "auth".to_string(),
                    path_prefix: "/api/v1/auth".to_string(),
                    service: "auth-service".to_string(),
                    policies: vec![PolicyKind::RateLimit, PolicyKind::CircuitBreaker],
                },
                RouteConfig {
                    name: "data".to_string(),
                    path_prefix: "/api/v1/data".to_string(),
                    service: "go-api".to_string(),
                    policies: vec![
                        PolicyKind::RateLimit,
                        PolicyKind::CircuitBreaker,
                        PolicyKind::Authenticate,
                    ],
                },
                RouteConfig {
                    name: "process".to_string(),
                    path_prefix: "/api/v1/process".to_string(),
                    service: "python-processor".to_string(),
                    policies: vec![PolicyKind::RateLimit, PolicyKind::CircuitBreaker],
                },
            ],
        }
    }
}

impl GatewayConfig {
    /// Returns true if any route requires a bearer credential.
    pub fn requires_auth(&self) -> bool {
        self.routes
            .iter()
            .any(|r| r.policies.contains(&PolicyKind::Authenticate))
    }

    /// Returns true if any route is rate limited.
    pub fn requires_rate_limit(&self) -> bool {
        self.routes
            .iter()
            .any(|r| r.policies.contains(&PolicyKind::RateLimit))
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout enforced at the listener, in seconds. Must exceed
    /// `upstream_secs` so a hung backend is answered with 504, not 408.
    pub request_secs: u64,

    /// Timeout for a single backend call, in seconds.
    pub upstream_secs: u64,

    /// Maximum time to wait for in-flight requests on shutdown, in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_secs(self.upstream_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 20,
            upstream_secs: 15,
            drain_secs: 30,
        }
    }
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Redis,
    Memory,
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Redis connection URL (e.g., "redis://redis:6379/0").
    pub redis_url: String,

    /// Upper bound on a single store round-trip, in milliseconds.
    pub op_timeout_ms: u64,

    /// Prefix for counter keys.
    pub key_prefix: String,
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redis,
            redis_url: "redis://redis:6379/0".to_string(),
            op_timeout_ms: 250,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Fixed-window rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per client within one window.
    pub limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Minimum requests in the tally window before the breaker may trip.
    pub min_requests: u32,

    /// Failure ratio (failures / requests) at which the breaker trips.
    pub failure_ratio: f64,

    /// Time spent Open before a trial is admitted, in seconds.
    pub open_timeout_secs: u64,

    /// Period after which the Closed tally is cleared, in seconds (0 = never).
    pub interval_secs: u64,

    /// Trial requests admitted while HalfOpen.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            open_timeout_secs: 30,
            interval_secs: 60,
            half_open_max_requests: 3,
        }
    }
}

/// Bearer credential verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Pre-shared HMAC secret.
    pub secret: String,

    /// Allowed clock skew when checking expiry, in seconds.
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            secret: "your-secret-key-change-in-production".to_string(),
            leeway_secs: 0,
        }
    }
}

/// Cross-origin resource sharing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; "*" mirrors the request origin.
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_secs: 300,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A backend service and the addresses it is reachable at.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name (unique).
    pub name: String,

    /// Endpoint base URLs, used in round-robin order.
    pub endpoints: Vec<String>,

    /// Environment variable that overrides `endpoints` (comma-separated).
    #[serde(default)]
    pub env: Option<String>,
}

impl ServiceConfig {
    fn new(name: &str, endpoint: &str, env: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoints: vec![endpoint.to_string()],
            env: Some(env.to_string()),
        }
    }
}

/// A policy stage that can be placed in front of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RateLimit,
    CircuitBreaker,
    Authenticate,
}

/// Route group: a path prefix, its policies (in order) and the target service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match (e.g., "/api/v1/data").
    pub path_prefix: String,

    /// Service name to forward to.
    pub service: String,

    /// Policies applied in the listed order before forwarding.
    #[serde(default)]
    pub policies: Vec<PolicyKind>,
}
