// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff, jitter, and breaker accounting.
//!
//! [`RetryExecutor`] is the only component that retries. It wraps a single
//! remote call (or a subscription, see [`RetryExecutor::execute_stream`]),
//! classifies failures into [`ErrorClass::Retryable`] / [`ErrorClass::Terminal`],
//! and reports exactly one outcome per call to the shared [`CircuitBreaker`].
//!
//! # Example
//!
//! ```
//! use offline_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(config.max_retries, 3);
//! assert_eq!(config.nominal_delay(0), Duration::from_secs(1));
//! assert_eq!(config.nominal_delay(2), Duration::from_secs(4));
//! assert_eq!(config.nominal_delay(9), Duration::from_secs(10)); // capped
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitBreaker;

/// How a failure should be treated by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; try again after a backoff delay
    Retryable,
    /// Permanent for this request; surface immediately
    Terminal,
}

/// Errors that know their own retry classification.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Error returned by a protected call.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Non-retryable failure. The original error is preserved as the source.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Terminal {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// Retryable failure that outlived the retry budget.
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The breaker refused the call; the remote was not contacted.
    #[error("{operation} rejected: circuit open")]
    CircuitOpen { operation: String },
}

impl<E> RetryError<E> {
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    /// The underlying error, if the remote was actually called.
    #[must_use]
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Terminal { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Remote calls made before giving up (0 when rejected by the breaker).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Terminal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
            Self::CircuitOpen { .. } => 0,
        }
    }
}

/// Backoff policy.
///
/// A call makes at most `1 + max_retries` attempts. The delay before retry
/// `n` (0-indexed) is `min(initial_delay * 2^n, max_delay)` scaled by a
/// uniform factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// Symmetric jitter as a fraction of the capped delay (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff. Useful for foreground reachability checks.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_retries: 3,
            jitter: 0.1,
        }
    }

    /// Capped delay before retry `n`, without jitter.
    #[must_use]
    pub fn nominal_delay(&self, n: u32) -> Duration {
        let factor = 2f64.powi(n.min(63) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before retry `n` with jitter applied.
    #[must_use]
    pub fn delay_for(&self, n: u32) -> Duration {
        let nominal = self.nominal_delay(n);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let spread = rand::rng().random_range(-jitter..=jitter);
        nominal.mul_f64(1.0 + spread)
    }
}

/// Runs remote operations under the retry policy and a shared breaker.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self { config, breaker }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` with retries, classifying failures with `classify`.
    ///
    /// Fails fast with [`RetryError::CircuitOpen`] when the breaker refuses
    /// the call. Otherwise reports one success or one failure to the breaker.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut op: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        if !self.breaker.allow_call() {
            crate::metrics::record_retry_outcome(operation, "rejected");
            return Err(RetryError::CircuitOpen {
                operation: operation.to_string(),
            });
        }

        let mut retry: u32 = 0;
        loop {
            let attempts = retry + 1;
            match op().await {
                Ok(value) => {
                    self.breaker.on_success();
                    if retry > 0 {
                        info!(operation, attempts, "Operation succeeded after retries");
                    }
                    crate::metrics::record_retry_outcome(operation, "success");
                    return Ok(value);
                }
                Err(err) => match classify(&err) {
                    ErrorClass::Terminal => {
                        self.breaker.on_failure();
                        warn!(operation, attempts, error = %err, "Operation failed with terminal error");
                        crate::metrics::record_retry_outcome(operation, "terminal");
                        return Err(RetryError::Terminal {
                            operation: operation.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                    ErrorClass::Retryable if retry >= self.config.max_retries => {
                        self.breaker.on_failure();
                        warn!(operation, attempts, error = %err, "Operation exhausted retries");
                        crate::metrics::record_retry_outcome(operation, "exhausted");
                        return Err(RetryError::Exhausted {
                            operation: operation.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                    ErrorClass::Retryable => {
                        let delay = self.config.delay_for(retry);
                        warn!(
                            operation,
                            attempt = attempts,
                            max_attempts = self.config.max_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Operation failed, retrying"
                        );
                        crate::metrics::record_retry_attempt(operation);
                        sleep(delay).await;
                        retry += 1;
                    }
                },
            }
        }
    }

    /// [`execute`](Self::execute) for errors that classify themselves.
    pub async fn execute_classified<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.execute(operation, op, E::class).await
    }

    /// Keep a subscription alive under the retry policy.
    ///
    /// `connect` (re-)establishes the upstream stream. A retryable stream
    /// error tears the connection down, waits the backoff delay and
    /// reconnects; the retry budget resets once an item is delivered. A
    /// terminal error, an exhausted budget, or a breaker rejection is yielded
    /// once and ends the stream. The stream also ends when the upstream ends.
    pub fn execute_stream<T, E, F>(
        &self,
        operation: impl Into<String>,
        connect: F,
    ) -> BoxStream<'static, Result<T, RetryError<E>>>
    where
        F: FnMut() -> BoxStream<'static, Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Classify + Display + Send + 'static,
    {
        let state = StreamState {
            executor: self.clone(),
            operation: operation.into(),
            connect,
            current: None,
            retry: 0,
            healthy: false,
            done: false,
        };

        stream::unfold(state, |mut s| async move {
            if s.done {
                return None;
            }
            loop {
                if s.current.is_none() {
                    if !s.executor.breaker.allow_call() {
                        s.done = true;
                        crate::metrics::record_retry_outcome(&s.operation, "rejected");
                        let err = RetryError::CircuitOpen {
                            operation: s.operation.clone(),
                        };
                        return Some((Err(err), s));
                    }
                    debug!(operation = %s.operation, "Establishing subscription");
                    s.current = Some((s.connect)());
                    s.healthy = false;
                }

                let next = match s.current.as_mut() {
                    Some(upstream) => upstream.next().await,
                    None => None,
                };

                match next {
                    Some(Ok(item)) => {
                        if !s.healthy {
                            s.healthy = true;
                            s.retry = 0;
                            s.executor.breaker.on_success();
                        }
                        return Some((Ok(item), s));
                    }
                    Some(Err(err)) => {
                        s.current = None;
                        let attempts = s.retry + 1;
                        match err.class() {
                            ErrorClass::Terminal => {
                                s.executor.breaker.on_failure();
                                s.done = true;
                                warn!(operation = %s.operation, error = %err, "Subscription failed with terminal error");
                                crate::metrics::record_retry_outcome(&s.operation, "terminal");
                                let err = RetryError::Terminal {
                                    operation: s.operation.clone(),
                                    attempts,
                                    source: err,
                                };
                                return Some((Err(err), s));
                            }
                            ErrorClass::Retryable if s.retry >= s.executor.config.max_retries => {
                                s.executor.breaker.on_failure();
                                s.done = true;
                                warn!(operation = %s.operation, attempts, error = %err, "Subscription exhausted retries");
                                crate::metrics::record_retry_outcome(&s.operation, "exhausted");
                                let err = RetryError::Exhausted {
                                    operation: s.operation.clone(),
                                    attempts,
                                    source: err,
                                };
                                return Some((Err(err), s));
                            }
                            ErrorClass::Retryable => {
                                let delay = s.executor.config.delay_for(s.retry);
                                warn!(
                                    operation = %s.operation,
                                    attempt = attempts,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "Subscription dropped, reconnecting"
                                );
                                crate::metrics::record_retry_attempt(&s.operation);
                                sleep(delay).await;
                                s.retry += 1;
                            }
                        }
                    }
                    None => return None,
                }
            }
        })
        .boxed()
    }
}

struct StreamState<T, E, F> {
    executor: RetryExecutor,
    operation: String,
    connect: F,
    current: Option<BoxStream<'static, Result<T, E>>>,
    retry: u32,
    /// An item arrived on the current connection
    healthy: bool,
    done: bool,
}
