#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! A [`GraphConfig`] is installed per thread with
//! [`runtime::configure`](crate::runtime::configure). It can be built in code,
//! parsed from JSON, or read from the environment:
//!
//! | variable                       | field                 |
//! |--------------------------------|-----------------------|
//! | `CELLFLOW_MAX_DEPTH`           | `max_depth`           |
//! | `CELLFLOW_PRIME_SUBSCRIPTIONS` | `prime_subscriptions` |
//!
//! `CELLFLOW_MAX_DEPTH` takes a number or `none`. Unparseable environment
//! values are ignored and the default is kept.

use serde::{Deserialize, Serialize};

const ENV_MAX_DEPTH: &str = "CELLFLOW_MAX_DEPTH";
const ENV_PRIME_SUBSCRIPTIONS: &str = "CELLFLOW_PRIME_SUBSCRIPTIONS";

/// Tunables for the thread-local cell graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of recomputes that may be nested inside one another
    /// before a read fails with [`CellError::DepthExceeded`](crate::CellError::DepthExceeded).
    /// `None` (the default) places no limit on nesting.
    pub max_depth: Option<usize>,
    /// Whether [`Cell::subscribe`](crate::Cell::subscribe) reads the cell once
    /// so its dependency edges exist before the first change.
    pub prime_subscriptions: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            prime_subscriptions: true,
        }
    }
}

impl GraphConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recompute nesting limit. Zero is clamped to one.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth.max(1));
        self
    }

    /// Remove the recompute nesting limit.
    #[must_use]
    pub fn without_max_depth(mut self) -> Self {
        self.max_depth = None;
        self
    }

    #[must_use]
    pub fn with_prime_subscriptions(mut self, prime: bool) -> Self {
        self.prime_subscriptions = prime;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        let max_depth = config.max_depth;
        Ok(match max_depth {
            Some(max_depth) => config.with_max_depth(max_depth),
            None => config,
        })
    }

    /// Defaults overlaid with `CELLFLOW_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_MAX_DEPTH) {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("none") {
                config = config.without_max_depth();
            } else {
                match raw.parse::<usize>() {
                    Ok(depth) => config = config.with_max_depth(depth),
                    Err(_) => tracing::debug!(variable = ENV_MAX_DEPTH, value = %raw, "ignoring unparseable setting"),
                }
            }
        }
        if let Some(raw) = lookup(ENV_PRIME_SUBSCRIPTIONS) {
            match parse_flag(&raw) {
                Some(prime) => config.prime_subscriptions = prime,
                None => tracing::debug!(variable = ENV_PRIME_SUBSCRIPTIONS, value = %raw, "ignoring unparseable setting"),
            }
        }
        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
