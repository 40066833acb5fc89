//! Ordered policy chains.
//!
//! # Responsibilities
//! - Define the stage capability: handle the request, or pass it on
//! - Run a route's stages in order and end at its terminal
//! - Record per-route request metrics
//!
//! # Design Decisions
//! - Stages are trait objects composed once at startup
//! - A stage that rejects never calls `next`, so later stages and the
//!   backend are skipped
//! - `Next` borrows the remaining chain; nothing is allocated per request

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use std::sync::Arc;
use std::time::Instant;

use crate::observability::metrics;

/// One policy in a route's chain.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short label for logs and startup output.
    fn name(&self) -> &'static str;

    /// Answer `request` directly, or hand it to `next`.
    async fn handle(&self, request: Request<Body>, next: Next<'_>) -> Response;
}

/// End of a chain; produces the response once every stage has passed.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn call(&self, request: Request<Body>) -> Response;
}

/// The remainder of a chain, as seen by the stage currently running.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: Request<Body>) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    terminal: self.terminal,
                };
                stage.handle(request, next).await
            }
            None => self.terminal.call(request).await,
        }
    }
}

/// A route's composed chain.
pub struct Pipeline {
    route: String,
    stages: Vec<Arc<dyn Stage>>,
    terminal: Arc<dyn Terminal>,
}

impl Pipeline {
    pub fn new(route: impl Into<String>, terminal: Arc<dyn Terminal>) -> Self {
        Self {
            route: route.into(),
            stages: Vec::new(),
            terminal,
        }
    }

    /// Append a stage; stages run in the order they were added.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn handle(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let next = Next {
            stages: &self.stages,
            terminal: self.terminal.as_ref(),
        };
        let response = next.run(request).await;
        metrics::record_request(&self.route, response.status().as_u16(), start);
        response
    }
}
