//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service name identified
//!     → registry.rs (look up the service's endpoint list)
//!     → round_robin.rs (rotate the per-service cursor)
//!     → Return endpoint URL, or None (service unavailable)
//! ```
//!
//! # Design Decisions
//! - One cursor per service; lookups for different services never contend
//! - No health filtering; failure isolation belongs to the circuit breaker
//! - Registrations live for the process lifetime

pub mod registry;
pub mod round_robin;

pub use registry::{ServiceRegistration, ServiceRegistry};
pub use round_robin::RoundRobin;
