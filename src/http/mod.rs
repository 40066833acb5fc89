//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, global middleware, /health)
//!     → request.rs (request ID, client identification)
//!     → [routing layer runs the route's pipeline]
//!     → proxy.rs (forward to the selected endpoint)
//!     → response.rs (structured JSON errors)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{ErrorBody, ErrorClass, GatewayError};
pub use server::{GatewayServer, ServerError};
