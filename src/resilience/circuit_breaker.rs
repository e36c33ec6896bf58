// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consecutive-failure circuit breaker.
//!
//! Protects the remote store from being hammered while it is unhealthy. The
//! breaker counts executor outcomes (one per protected call, after retries),
//! not individual attempts.
//!
//! States:
//! - Closed: calls pass through
//! - Open: calls fail fast with a circuit-open error
//!
//! There is no separate half-open state. Once the cooldown has elapsed the
//! next [`allow_call`](CircuitBreaker::allow_call) closes the breaker and lets
//! that call through as a trial. The failure count is kept, so a failing trial
//! re-opens the breaker immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{duration_millis, Clock};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

impl CircuitConfig {
    /// Small threshold, short cooldown
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Point-in-time copy of the breaker's state.
///
/// Invariant: `is_open` implies `opened_at.is_some()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitSnapshot {
    pub is_open: bool,
    /// Epoch millis when the circuit last opened
    pub opened_at: Option<i64>,
    pub consecutive_failures: u32,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitSnapshot>,

    // Metrics
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(CircuitSnapshot::default()),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state without side effects (does not close an expired circuit).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        if self.state.lock().is_open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        *self.state.lock()
    }

    /// Gate a call. Closes the circuit when the cooldown has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_open {
            return true;
        }

        let now = self.clock.now_millis();
        let opened_at = state.opened_at.unwrap_or(now);
        if now.saturating_sub(opened_at) > duration_millis(self.config.cooldown) {
            state.is_open = false;
            state.opened_at = None;
            drop(state);
            info!(circuit = %self.name, "Circuit cooldown elapsed, allowing trial call");
            crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
            return true;
        }

        drop(state);
        self.rejections.fetch_add(1, Ordering::Relaxed);
        debug!(circuit = %self.name, "Circuit open, rejecting call");
        crate::metrics::record_circuit_call(&self.name, "rejected");
        false
    }

    pub fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let was_open = {
            let mut state = self.state.lock();
            let was_open = state.is_open;
            state.is_open = false;
            state.opened_at = None;
            state.consecutive_failures = 0;
            was_open
        };
        if was_open {
            info!(circuit = %self.name, "Circuit closed after successful call");
            crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
        }
        crate::metrics::record_circuit_call(&self.name, "success");
    }

    pub fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_millis();
        let (opened, failures) = {
            let mut state = self.state.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let trip = state.consecutive_failures >= self.config.failure_threshold;
            let opened = trip && !state.is_open;
            if trip {
                state.is_open = true;
                state.opened_at = Some(now);
            }
            (opened, state.consecutive_failures)
        };
        if opened {
            warn!(
                circuit = %self.name,
                consecutive_failures = failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit opened"
            );
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
        }
        crate::metrics::record_circuit_call(&self.name, "failure");
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Calls refused while open
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Force the breaker closed and forget the failure streak.
    pub fn reset(&self) {
        *self.state.lock() = CircuitSnapshot::default();
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }
}
