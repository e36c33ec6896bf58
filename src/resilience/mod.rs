// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fault tolerance around remote calls: retry with backoff and a circuit breaker.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState};
pub use retry::{Classify, ErrorClass, RetryConfig, RetryError, RetryExecutor};
