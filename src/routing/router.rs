//! Route lookup and pipeline composition.
//!
//! # Responsibilities
//! - Compose one pipeline per configured route at startup
//! - Look up the pipeline for a request path
//! - Return the matched pipeline or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins, so nested prefixes behave predictably
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - One breaker per service, shared by every route targeting it

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GatewayConfig, PolicyKind, RouteConfig};
use crate::config::validation::ValidationError;
use crate::http::proxy::{Forwarder, UpstreamClient};
use crate::load_balancer::ServiceRegistry;
use crate::resilience::{BreakerSettings, CircuitBreaker};
use crate::routing::matcher::PathPrefixMatcher;
use crate::routing::pipeline::{Pipeline, Stage};
use crate::routing::stages::{AuthStage, BreakerStage, RateLimitStage};
use crate::security::{Authenticator, RateLimiter};

/// Shared policy state the composer draws stages from.
pub struct Policies {
    pub limiter: Arc<RateLimiter>,
    pub authenticator: Arc<Authenticator>,
    pub breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl Policies {
    /// Create one breaker per configured service.
    pub fn new(config: &GatewayConfig, limiter: Arc<RateLimiter>, authenticator: Arc<Authenticator>) -> Self {
        let settings = BreakerSettings::from(&config.circuit_breaker);
        let breakers = config
            .services
            .iter()
            .map(|s| {
                let breaker = CircuitBreaker::new(s.name.clone(), settings.clone());
                (s.name.clone(), Arc::new(breaker))
            })
            .collect();

        Self {
            limiter,
            authenticator,
            breakers,
        }
    }

    pub fn breaker(&self, service: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(service)
    }
}

struct CompiledRoute {
    matcher: PathPrefixMatcher,
    pipeline: Arc<Pipeline>,
}

/// Immutable table of composed routes.
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Build every route's chain, in the policy order its config lists.
    pub fn compose(
        routes: &[RouteConfig],
        policies: &Policies,
        registry: Arc<ServiceRegistry>,
        client: UpstreamClient,
        upstream_timeout: Duration,
    ) -> Result<Self, ValidationError> {
        let mut compiled = Vec::with_capacity(routes.len());

        for route in routes {
            let forwarder = Forwarder::new(
                route.service.clone(),
                registry.clone(),
                client.clone(),
                upstream_timeout,
            );
            let mut pipeline = Pipeline::new(route.name.clone(), Arc::new(forwarder));

            for policy in &route.policies {
                let stage: Arc<dyn Stage> = match policy {
                    PolicyKind::RateLimit => {
                        Arc::new(RateLimitStage::new(route.name.clone(), policies.limiter.clone()))
                    }
                    PolicyKind::CircuitBreaker => {
                        let breaker = policies.breaker(&route.service).ok_or_else(|| {
                            ValidationError::UnknownService {
                                route: route.name.clone(),
                                service: route.service.clone(),
                            }
                        })?;
                        Arc::new(BreakerStage::new(breaker.clone()))
                    }
                    PolicyKind::Authenticate => {
                        Arc::new(AuthStage::new(policies.authenticator.clone()))
                    }
                };
                pipeline = pipeline.with_stage(stage);
            }

            tracing::info!(
                route = %route.name,
                prefix = %route.path_prefix,
                service = %route.service,
                stages = ?pipeline.stage_names(),
                "Route composed"
            );

            compiled.push(CompiledRoute {
                matcher: PathPrefixMatcher::new(route.path_prefix.clone()),
                pipeline: Arc::new(pipeline),
            });
        }

        compiled.sort_by(|a, b| b.matcher.prefix().len().cmp(&a.matcher.prefix().len()));
        Ok(Self { routes: compiled })
    }

    /// Pipeline for `path`, if any route matches.
    pub fn lookup(&self, path: &str) -> Option<&Arc<Pipeline>> {
        self.routes
            .iter()
            .find(|r| r.matcher.matches(path))
            .map(|r| &r.pipeline)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::proxy::upstream_client;
    use crate::store::MemoryCounterStore;

    fn table(config: &GatewayConfig) -> Result<RouteTable, ValidationError> {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            &config.rate_limit,
            "ratelimit",
        ));
        let authenticator = Arc::new(Authenticator::new(&config.auth));
        let policies = Policies::new(config, limiter, authenticator);
        let registry = Arc::new(ServiceRegistry::from_config(&config.services).unwrap());
        RouteTable::compose(
            &config.routes,
            &policies,
            registry,
            upstream_client(Duration::from_secs(1)),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn default_routes_compose_with_their_policies() {
        let table = table(&GatewayConfig::default()).unwrap();
        assert_eq!(table.len(), 3);

        let auth = table.lookup("/api/v1/auth/login").unwrap();
        assert_eq!(auth.route(), "auth");
        assert_eq!(auth.stage_names(), vec!["rate_limit", "circuit_breaker"]);

        let data = table.lookup("/api/v1/data/housing").unwrap();
        assert_eq!(
            data.stage_names(),
            vec!["rate_limit", "circuit_breaker", "authenticate"]
        );

        assert!(table.lookup("/api/v1/unknown").is_none());
        assert!(table.lookup("/health").is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteConfig {
            name: "data-admin".into(),
            path_prefix: "/api/v1/data/admin".into(),
            service: "go-api".into(),
            policies: vec![PolicyKind::Authenticate],
        });

        let table = table(&config).unwrap();
        assert_eq!(table.lookup("/api/v1/data/admin/users").unwrap().route(), "data-admin");
        assert_eq!(table.lookup("/api/v1/data/other").unwrap().route(), "data");
    }

    #[test]
    fn breaker_for_unknown_service_is_rejected() {
        let mut config = GatewayConfig::default();
        config.routes[0].service = "ghost".into();
        assert!(matches!(
            table(&config),
            Err(ValidationError::UnknownService { .. })
        ));
    }
}
