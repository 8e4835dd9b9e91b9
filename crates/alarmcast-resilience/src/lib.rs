// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the alarmcast delivery engine.
//!
//! - [`circuit_breaker`]: per-endpoint breaker with a single-probe half-open state
//! - [`registry`]: explicit name-keyed breaker map shared by `Arc`
//! - [`backoff`]: delay computation and the retry loop
//! - [`limiter`]: per-channel concurrency semaphores

pub mod backoff;
pub mod circuit_breaker;
pub mod limiter;
pub mod registry;

pub use backoff::{compute_delay, with_retry, BackoffStrategy, Retry, RetryPolicy};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState, Permit,
};
pub use limiter::ChannelLimiters;
pub use registry::BreakerRegistry;
