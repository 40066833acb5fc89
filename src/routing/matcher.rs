//! Route matching logic.
//!
//! # Responsibilities
//! - Match a request path against a route prefix
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Prefixes match on segment boundaries: `/api/v1/auth` matches
//!   `/api/v1/auth` and `/api/v1/auth/login`, never `/api/v1/authx`
//! - No regex to guarantee O(n) matching

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. A trailing `/` is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.is_empty(),
            None => false,
        }
    }
}
