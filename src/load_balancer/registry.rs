//! Service registry.
//!
//! # Responsibilities
//! - Hold the ordered endpoint list of every logical service
//! - Select the next endpoint round-robin on each lookup
//!
//! Selection is not health-aware: a failing endpoint stays in rotation and
//! the circuit breaker absorbs the failures.

use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

use crate::config::validation::{parse_endpoint, ValidationError};
use crate::config::ServiceConfig;
use crate::load_balancer::round_robin::RoundRobin;

/// Endpoints registered under one service name, with their rotation cursor.
#[derive(Debug)]
pub struct ServiceRegistration {
    pub name: String,
    pub endpoints: Vec<Url>,
    cursor: RoundRobin,
}

impl ServiceRegistration {
    fn new(name: String, endpoints: Vec<Url>) -> Self {
        Self {
            name,
            endpoints,
            cursor: RoundRobin::new(),
        }
    }

    fn next(&self) -> Option<Url> {
        self.cursor
            .next_index(self.endpoints.len())
            .map(|i| self.endpoints[i].clone())
    }
}

/// Registry of services keyed by name.
///
/// Lookups for different services never contend: the map is sharded and
/// each registration advances its own atomic cursor.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceRegistration>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from validated service definitions.
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, ValidationError> {
        let registry = Self::new();
        for service in services {
            let endpoints = service
                .endpoints
                .iter()
                .map(|raw| {
                    parse_endpoint(raw).map_err(|reason| ValidationError::Endpoint {
                        service: service.name.clone(),
                        endpoint: raw.clone(),
                        reason,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            registry.register(service.name.clone(), endpoints);
        }
        Ok(registry)
    }

    /// Replace the endpoint list for `name` and reset its cursor.
    pub fn register(&self, name: impl Into<String>, endpoints: Vec<Url>) {
        let name = name.into();
        tracing::info!(
            service = %name,
            endpoints = ?endpoints.iter().map(Url::as_str).collect::<Vec<_>>(),
            "Service registered"
        );
        let registration = Arc::new(ServiceRegistration::new(name.clone(), endpoints));
        self.services.insert(name, registration);
    }

    /// Select the next endpoint for `name`.
    ///
    /// Returns `None` if the service is unknown or has no endpoints.
    pub fn next_endpoint(&self, name: &str) -> Option<Url> {
        // Clone the Arc so the shard lock is released before selecting.
        let registration = self.services.get(name).map(|r| Arc::clone(r.value()));
        match registration {
            Some(registration) => registration.next(),
            None => {
                tracing::debug!(service = %name, "Service not found in registry");
                None
            }
        }
    }

    /// All endpoints registered for `name`.
    pub fn endpoints(&self, name: &str) -> Vec<Url> {
        self.services
            .get(name)
            .map(|r| r.endpoints.clone())
            .unwrap_or_default()
    }

    /// Names of all registered services.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|r| r.key().clone()).collect()
    }
}
