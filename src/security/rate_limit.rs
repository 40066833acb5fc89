//! Fixed-window rate limiting backed by the shared counter store.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::http::response::ErrorClass;
use crate::observability::metrics;
use crate::store::CounterStore;

/// Per-client fixed-window limiter.
///
/// The window opens at the first request after the previous one expired,
/// so a burst of up to `2 * limit` can straddle a window boundary.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: &RateLimitConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            limit: config.limit,
            window: config.window(),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `client` and decide whether it may proceed.
    ///
    /// Fails open: if the store cannot be reached the request is allowed.
    pub async fn allow(&self, client: &str) -> bool {
        let key = format!("{}:{}", self.key_prefix, client);
        match self.store.increment(&key, self.window).await {
            Ok(count) => count <= self.limit,
            Err(e) => {
                tracing::warn!(
                    client = %client,
                    error = %e,
                    class = ErrorClass::DependencyUnavailable.as_str(),
                    "Rate limit store unavailable, allowing request"
                );
                metrics::record_store_error();
                true
            }
        }
    }
}
