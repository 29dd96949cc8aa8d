//! Per-call circuit breaker for evidence strategies.
//!
//! The breaker tracks failures per strategy name for the lifetime of one
//! selection call. Once failures inside `failure_window_ms` reach
//! `max_failures` the circuit is *open* and the strategy is not called again
//! in this call. Nothing is carried across calls; a fresh breaker is built
//! at the start of every selection.

use crate::config::CircuitBreakerConfig;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Circuit state for a single strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls allowed.
    Closed,
    /// Failure budget exhausted for this call.
    Open,
}

#[derive(Debug, Clone)]
pub struct CallCircuitBreaker {
    failures: HashMap<String, Vec<Instant>>,
    tripped: HashSet<String>,
    window: Duration,
    /// Failures before the circuit opens (at least 1).
    pub max_failures: u32,
    /// Advisory wait reported when the circuit opens.
    pub cooloff_ms: u64,
}

impl CallCircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failures: HashMap::new(),
            tripped: HashSet::new(),
            window: Duration::from_millis(config.failure_window_ms),
            max_failures: config.max_failures.max(1),
            cooloff_ms: config.cooloff_ms,
        }
    }

    /// Record a failure; returns failures currently inside the window.
    pub fn record_failure(&mut self, strategy: &str) -> u32 {
        let now = Instant::now();
        let window = self.window;
        let entries = self.failures.entry(strategy.to_string()).or_default();
        entries.push(now);
        entries.retain(|t| now.duration_since(*t) <= window);
        entries.len() as u32
    }

    /// Failures inside the window for `strategy`.
    pub fn failure_count(&self, strategy: &str) -> u32 {
        let now = Instant::now();
        self.failures.get(strategy).map_or(0, |entries| {
            entries
                .iter()
                .filter(|t| now.duration_since(**t) <= self.window)
                .count() as u32
        })
    }

    pub fn state(&self, strategy: &str) -> CircuitState {
        if self.tripped.contains(strategy) || self.failure_count(strategy) >= self.max_failures {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self, strategy: &str) -> bool {
        self.state(strategy) == CircuitState::Open
    }

    /// Keep a strategy open for the rest of the call, regardless of the window.
    pub fn trip(&mut self, strategy: &str) {
        self.tripped.insert(strategy.to_string());
    }
}

impl Default for CallCircuitBreaker {
    fn default() -> Self {
        Self::new(&CircuitBreakerConfig::default())
    }
}
