//! Circuit breaker guarding Redis calls per `(operation, node)` (`§4.C`).
//!
//! State machine: `Closed -> Open` after `threshold` consecutive failures;
//! `Open -> HalfOpen` once `timeout` has elapsed since the last failure;
//! `HalfOpen -> Closed` after `half_open_requests` consecutive probe
//! successes, or straight back to `Open` on the first probe failure.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub timeout: Duration,
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            timeout: Duration::from_secs(30),
            half_open_requests: 3,
        }
    }
}

struct NodeState {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Probe requests currently admitted while `HalfOpen`; capped at
    /// `half_open_requests` so probes are bounded concurrently, not just
    /// bounded in how many consecutive successes close the breaker.
    half_open_in_flight: u32,
}

impl NodeState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }
}

/// Current status of a single `(operation, node)` breaker, for `/stats`.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Registry of independent breakers keyed by `(operation, node)`.
pub struct CircuitBreaker {
    config: BreakerConfig,
    nodes: DashMap<(String, String), Arc<RwLock<NodeState>>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            nodes: DashMap::new(),
        }
    }

    fn entry(&self, operation: &str, node: &str) -> Arc<RwLock<NodeState>> {
        self.nodes
            .entry((operation.to_string(), node.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(NodeState::new())))
            .clone()
    }

    /// Returns `Err(BreakerOpen)` if the breaker will not admit a call right
    /// now; otherwise transitions `Open -> HalfOpen` as needed and admits.
    /// While `HalfOpen`, at most `half_open_requests` probes are admitted
    /// concurrently; further arrivals are rejected until an in-flight probe
    /// reports its outcome via `record_success`/`record_failure`.
    pub fn before_call(&self, operation: &str, node: &str) -> Result<(), CacheError> {
        let entry = self.entry(operation, node);
        let mut guard = entry.write();
        if guard.state == BreakerState::Open {
            let elapsed = guard
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.config.timeout {
                guard.state = BreakerState::HalfOpen;
                guard.consecutive_successes = 0;
                guard.half_open_in_flight = 0;
            } else {
                return Err(CacheError::BreakerOpen {
                    operation: operation.to_string(),
                    node: node.to_string(),
                    threshold: self.config.threshold,
                    failures: guard.consecutive_failures,
                });
            }
        }

        if guard.state == BreakerState::HalfOpen {
            if guard.half_open_in_flight >= self.config.half_open_requests {
                return Err(CacheError::BreakerOpen {
                    operation: operation.to_string(),
                    node: node.to_string(),
                    threshold: self.config.threshold,
                    failures: guard.consecutive_failures,
                });
            }
            guard.half_open_in_flight += 1;
        }
        Ok(())
    }

    pub fn record_success(&self, operation: &str, node: &str) {
        let entry = self.entry(operation, node);
        let mut guard = entry.write();
        guard.consecutive_failures = 0;
        match guard.state {
            BreakerState::HalfOpen => {
                guard.half_open_in_flight = guard.half_open_in_flight.saturating_sub(1);
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.half_open_requests {
                    guard.state = BreakerState::Closed;
                    guard.opened_at = None;
                    guard.half_open_in_flight = 0;
                }
            }
            BreakerState::Open => {}
            BreakerState::Closed => {}
        }
    }

    pub fn record_failure(&self, operation: &str, node: &str) {
        let entry = self.entry(operation, node);
        let mut guard = entry.write();
        guard.consecutive_successes = 0;
        guard.consecutive_failures += 1;
        match guard.state {
            BreakerState::HalfOpen => {
                guard.state = BreakerState::Open;
                guard.opened_at = Some(Instant::now());
                guard.half_open_in_flight = 0;
            }
            BreakerState::Closed if guard.consecutive_failures >= self.config.threshold => {
                guard.state = BreakerState::Open;
                guard.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// Run `f`, recording the outcome and rejecting up front when open.
    pub async fn call<T, F, Fut>(&self, operation: &str, node: &str, f: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CacheError>>,
    {
        self.before_call(operation, node)?;
        match f().await {
            Ok(value) => {
                self.record_success(operation, node);
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_breaker_failure() {
                    self.record_failure(operation, node);
                }
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn is_healthy(&self, operation: &str, node: &str) -> bool {
        self.entry(operation, node).read().state != BreakerState::Open
    }

    #[must_use]
    pub fn status(&self, operation: &str, node: &str) -> BreakerStatus {
        let guard = self.entry(operation, node).read();
        BreakerStatus {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
        }
    }

    /// Force every known breaker back to `Closed`. Used by admin `/reload`.
    pub fn reset_all(&self) {
        for entry in self.nodes.iter() {
            let mut guard = entry.value().write();
            guard.state = BreakerState::Closed;
            guard.consecutive_failures = 0;
            guard.consecutive_successes = 0;
            guard.opened_at = None;
            guard.half_open_in_flight = 0;
        }
    }

    /// All `(operation, node)` pairs with a breaker currently tracked, with
    /// their state — used to drive the `circuit_breaker_state` gauge.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String, BreakerState)> {
        self.nodes
            .iter()
            .map(|e| (e.key().0.clone(), e.key().1.clone(), e.value().read().state))
            .collect()
    }
}
