// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-endpoint circuit breaker.
//!
//! # States
//!
//! - **Closed**: calls pass; consecutive failures are counted
//! - **Open**: calls are rejected with a retryable `circuit_open` error until
//!   the timeout elapses
//! - **HalfOpen**: a bounded number of probe calls test recovery; one probe
//!   success closes the circuit, one probe failure reopens it
//!
//! Admission hands out a [`Permit`]. Dropping a permit without reporting an
//! outcome (e.g. the caller's future was cancelled) releases its probe slot.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use alarmcast_config::model::BreakerConfig;
use alarmcast_core::ClassifiedError;

/// Probe successes needed to close a half-open circuit.
const SUCCESS_THRESHOLD: u32 = 1;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub timeout: Duration,
    /// Concurrent probes while half-open.
    pub half_open_max_probes: u32,
    /// Retry hint for calls rejected while the probe slots are taken.
    pub busy_retry_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_probes: 1,
            busy_retry_after: Duration::from_secs(2),
        }
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(c: &BreakerConfig) -> Self {
        Self {
            failure_threshold: c.failure_threshold.max(1),
            timeout: Duration::from_secs(c.timeout_secs),
            half_open_max_probes: c.half_open_max_probes.max(1),
            busy_retry_after: Duration::from_secs(c.busy_retry_after_secs),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    /// Time until an open circuit admits a probe.
    pub next_attempt_in: Option<Duration>,
    pub in_flight_probes: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    probes: u32,
    /// Bumped on every transition; outcomes from an older generation are ignored.
    generation: u64,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            next_attempt: None,
            probes: 0,
            generation: 0,
        }
    }
}

/// A circuit breaker guarding one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic mid-update; recover from poisoning.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a call or reject it with a retryable classified error.
    pub fn try_acquire(&self) -> Result<Permit<'_>, ClassifiedError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false, inner.generation)),
            CircuitState::Open => match inner.next_attempt {
                Some(at) if now < at => {
                    alarmcast_prometheus::record_breaker_rejection(&self.name, "open");
                    Err(ClassifiedError::circuit_open(&self.name, at - now))
                }
                _ => {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.success_count = 0;
                    inner.probes = 1;
                    Ok(Permit::new(self, true, inner.generation))
                }
            },
            CircuitState::HalfOpen => {
                if inner.probes < self.config.half_open_max_probes {
                    inner.probes += 1;
                    Ok(Permit::new(self, true, inner.generation))
                } else {
                    alarmcast_prometheus::record_breaker_rejection(&self.name, "busy");
                    Err(ClassifiedError::circuit_busy(
                        &self.name,
                        self.config.busy_retry_after,
                    ))
                }
            }
        }
    }

    /// Admit, run `op`, and record its outcome.
    ///
    /// Every error counts as a failure, retryable or not.
    ///
    /// The probe slot is released even if the returned future is dropped
    /// before completion.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let permit = self.try_acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) => permit.failure(e),
        }
        result
    }

    /// Whether a call would be admitted right now. Changes no state.
    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.next_attempt.is_none_or(|at| Instant::now() >= at),
            CircuitState::HalfOpen => inner.probes < self.config.half_open_max_probes,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.lock();
        let now = Instant::now();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure,
            next_attempt_in: match inner.state {
                CircuitState::Open => inner.next_attempt.map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
            in_flight_probes: inner.probes,
        }
    }

    /// Force the breaker closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        let generation = inner.generation;
        *inner = Inner {
            generation,
            ..Inner::closed()
        };
        info!(endpoint = %self.name, "circuit breaker reset");
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        match to {
            CircuitState::Open => warn!(
                endpoint = %self.name,
                %from,
                failures = inner.failure_count,
                timeout_secs = self.config.timeout.as_secs(),
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(endpoint = %self.name, "circuit breaker probing"),
            CircuitState::Closed => info!(endpoint = %self.name, %from, "circuit breaker closed"),
        }
        alarmcast_prometheus::record_circuit_transition(
            &self.name,
            &from.to_string(),
            &to.to_string(),
        );
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.next_attempt = Some(now + self.config.timeout);
        inner.probes = 0;
        inner.success_count = 0;
    }

    fn on_success(&self, probe: bool, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        match (inner.state, probe) {
            (CircuitState::Closed, false) => inner.failure_count = 0,
            (CircuitState::HalfOpen, true) => {
                inner.probes = inner.probes.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= SUCCESS_THRESHOLD {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt = None;
                    inner.probes = 0;
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool, generation: u64, error: &ClassifiedError) {
        let mut inner = self.lock();
        let now = Instant::now();
        if inner.generation != generation {
            debug!(endpoint = %self.name, "ignoring outcome from a previous circuit state");
            return;
        }
        inner.last_failure = Some(now);
        match (inner.state, probe) {
            (CircuitState::Closed, false) => {
                inner.failure_count += 1;
                debug!(
                    endpoint = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "circuit breaker failure recorded"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.failure_count += 1;
                self.open(&mut inner, now);
            }
            _ => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.probes = inner.probes.saturating_sub(1);
        }
    }
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`success`](Permit::success) or
/// [`failure`](Permit::failure). Dropping it unreported frees the probe slot
/// without recording anything.
#[must_use = "report the call outcome or drop the permit"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    reported: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool, generation: u64) -> Self {
        Self {
            breaker,
            probe,
            generation,
            reported: false,
        }
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.probe, self.generation);
    }

    pub fn failure(mut self, error: &ClassifiedError) {
        self.reported = true;
        self.breaker.on_failure(self.probe, self.generation, error);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.reported {
            self.breaker.release_probe(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmcast_core::{ErrorKind, Severity};

    fn boom() -> ClassifiedError {
        ClassifiedError::new(ErrorKind::Provider, true, Severity::High, "server_error", "503")
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "sms:test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), ClassifiedError> {
        b.execute(|| async { Err::<(), _>(boom()) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), ClassifiedError> {
        b.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_rejects_with_remaining_time() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(12_300)).await;
        let err = succeed(&b).await.unwrap_err();
        assert_eq!(err.category(), "circuit_open");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(48)));
        assert!(!b.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_count_toward_the_threshold() {
        let b = breaker(2);
        for _ in 0..2 {
            let err = b
                .execute(|| async {
                    Err::<(), _>(ClassifiedError::validation("bad number", None))
                })
                .await
                .unwrap_err();
            assert_eq!(err.category(), "validation");
        }
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn interleaved_server_and_auth_errors_trip() {
        let b = breaker(5);
        let unauthorized = || {
            ClassifiedError::new(ErrorKind::Provider, false, Severity::Medium, "authentication", "401")
        };
        let _ = fail(&b).await;
        let _ = b.execute(|| async { Err::<(), _>(unauthorized()) }).await;
        let _ = fail(&b).await;
        let _ = b.execute(|| async { Err::<(), _>(unauthorized()) }).await;
        assert_eq!(b.status().failure_count, 4);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(succeed(&b).await.unwrap_err().category(), "circuit_open");
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count_when_closed() {
        let b = breaker(3);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.status().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_probe_after_timeout() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(b.is_available());

        let probe = b.try_acquire().expect("first caller probes");
        assert!(probe.is_probe());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let busy = b.try_acquire().unwrap_err();
        assert_eq!(busy.category(), "circuit_busy");
        assert_eq!(busy.retry_after(), Some(Duration::from_secs(2)));

        probe.success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.status().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_fresh_timeout() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.status().next_attempt_in, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_its_slot() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let probe = b.try_acquire().unwrap();
        drop(probe);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.status().in_flight_probes, 0);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_execute_releases_probe() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let pending = b.execute(|| std::future::pending::<Result<(), ClassifiedError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(b.status().in_flight_probes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_outcomes_are_ignored() {
        let b = breaker(2);
        let slow = b.try_acquire().unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        // Admitted while closed, finished after the circuit opened.
        slow.success();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.status().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_closes_and_clears() {
        let b = breaker(1);
        let _ = fail(&b).await;
        b.reset();
        let status = b.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(status.last_failure_time.is_none());
        succeed(&b).await.unwrap();
    }
}
