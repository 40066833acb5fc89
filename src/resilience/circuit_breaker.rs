//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through and are tallied
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests test the backend
//!
//! # State Transitions
//! ```text
//! Closed → Open:      requests >= min_requests AND failures/requests >= failure_ratio
//! Open → Half-Open:   open_timeout elapsed since entering Open
//! Half-Open → Closed: half_open_max_requests consecutive successes
//! Half-Open → Open:   any trial failure
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global), each behind its own mutex
//! - The tally is reset on every transition and, while Closed, every `interval`
//! - Outcomes are tagged with a generation; results reported after a
//!   transition are ignored
//! - A call dropped before completing counts as a failure

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half-open",
            BreakerState::Open => "open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request tally since the last state transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Tuning for a single breaker.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub open_timeout: Duration,
    /// Closed-state tally period; zero never clears.
    pub interval: Duration,
    pub half_open_max_requests: u32,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            min_requests: config.min_requests,
            failure_ratio: config.failure_ratio,
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            interval: Duration::from_secs(config.interval_secs),
            half_open_max_requests: config.half_open_max_requests.max(1),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker is open; the call was not attempted.
    Open,
    /// The breaker is half-open and its trial capacity is used up.
    TooManyRequests,
    /// The call ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::TooManyRequests => write!(f, "circuit breaker is half-open"),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    /// Closed: end of tally window. Open: reopen deadline. Half-Open: unused.
    expiry: Option<Instant>,
}

/// Circuit breaker guarding one backend service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let name = name.into();
        let now = Instant::now();
        let expiry = (!settings.interval.is_zero()).then(|| now + settings.interval);
        metrics::record_breaker_state(&name, BreakerState::Closed);
        Self {
            name,
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any time-based transition that is due.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.state
    }

    /// Tally since the last transition.
    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    /// Run `f` under the breaker.
    ///
    /// While Open (or Half-Open at capacity) `f` is not invoked. Otherwise
    /// `Ok` from `f` is recorded as a success and `Err` as a failure, and
    /// `f`'s result is returned.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(|rejection| match rejection {
            Rejection::Open => BreakerError::Open,
            Rejection::TooManyRequests => BreakerError::TooManyRequests,
        })?;

        let result = f().await;
        permit.complete(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());

        match inner.state {
            BreakerState::Open => return Err(Rejection::Open),
            BreakerState::HalfOpen
                if inner.counts.requests >= self.settings.half_open_max_requests =>
            {
                return Err(Rejection::TooManyRequests)
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            completed: false,
        })
    }

    fn on_outcome(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.current_state(&mut inner, now);

        if inner.generation != generation {
            return;
        }

        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.counts.on_success(),
            (BreakerState::Closed, false) => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.half_open_max_requests {
                    self.set_state(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.set_state(&mut inner, BreakerState::Open, now);
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests < self.settings.min_requests || counts.requests == 0 {
            return false;
        }
        let ratio = f64::from(counts.total_failures) / f64::from(counts.requests);
        ratio >= self.settings.failure_ratio
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn set_state(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        if inner.state == state {
            return;
        }

        let from = inner.state;
        let counts = inner.counts;
        inner.state = state;
        self.new_generation(inner, now);

        if state == BreakerState::Open {
            tracing::warn!(
                service = %self.name,
                from = %from,
                requests = counts.requests,
                failures = counts.total_failures,
                reopen_in = ?self.settings.open_timeout,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(service = %self.name, from = %from, to = %state, "Circuit breaker state changed");
        }
        metrics::record_breaker_state(&self.name, state);
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => {
                (!self.settings.interval.is_zero()).then(|| now + self.settings.interval)
            }
            BreakerState::Open => Some(now + self.settings.open_timeout),
            BreakerState::HalfOpen => None,
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

enum Rejection {
    Open,
    TooManyRequests,
}

/// Admission for one call. Dropping it without completing records a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    completed: bool,
}

impl Permit<'_> {
    fn complete(mut self, success: bool) {
        self.completed = true;
        self.breaker.on_outcome(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.on_outcome(self.generation, false);
        }
    }
}
