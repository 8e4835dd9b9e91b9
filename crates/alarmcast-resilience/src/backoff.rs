// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry delays and the retry loop.
//!
//! Delays grow per strategy from `base_delay`, are capped at `max_delay`,
//! and are multiplied by a uniform jitter factor in `[0.75, 1.25)`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use alarmcast_config::model::BackoffKind;

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base`
    Fixed,
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Exponential => Self::Exponential,
            BackoffKind::Linear => Self::Linear,
            BackoffKind::Fixed => Self::Fixed,
        }
    }
}

/// Un-jittered delay after failed attempt `attempt` (1-based), capped at `max`.
pub fn compute_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    strategy: BackoffStrategy,
) -> Duration {
    let attempt = attempt.max(1);
    let delay = match strategy {
        BackoffStrategy::Exponential => {
            let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
            base.checked_mul(factor).unwrap_or(max)
        }
        BackoffStrategy::Linear => base.checked_mul(attempt).unwrap_or(max),
        BackoffStrategy::Fixed => base,
    };
    delay.min(max)
}

/// Multiply by `U(0.75, 1.25)`, floor to whole milliseconds, clamp to `max`.
pub fn jitter(delay: Duration, max: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.75..1.25);
    let ms = (delay.as_millis() as f64 * factor).floor() as u64;
    Duration::from_millis(ms).min(max)
}

/// Retry budget and delay shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = compute_delay(attempt, self.base_delay, self.max_delay, self.strategy);
        if self.jitter {
            jitter(delay, self.max_delay)
        } else {
            delay
        }
    }

    /// Like [`delay_for`](Self::delay_for), but a larger hint wins.
    ///
    /// The result never exceeds `max_delay`.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.delay_for(attempt);
        match hint {
            Some(hint) if hint > computed => hint.min(self.max_delay),
            _ => computed,
        }
    }
}

type ShouldRetry<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type DelayHint<'a, E> = Box<dyn Fn(&E) -> Option<Duration> + Send + Sync + 'a>;
type OnRetry<'a, E> = Box<dyn FnMut(u32, Duration, &E) + Send + 'a>;

/// Retry loop builder.
///
/// ```no_run
/// # use alarmcast_resilience::{Retry, RetryPolicy};
/// # async fn demo() -> Result<(), std::io::Error> {
/// let out = Retry::new(RetryPolicy::default())
///     .should_retry(|e: &std::io::Error| e.kind() != std::io::ErrorKind::InvalidInput)
///     .on_retry(|attempt, delay, e| tracing::warn!(attempt, ?delay, error = %e, "retrying"))
///     .run(|_attempt| async { Ok::<_, std::io::Error>(42) })
///     .await?;
/// # Ok(()) }
/// ```
pub struct Retry<'a, E> {
    policy: RetryPolicy,
    should_retry: ShouldRetry<'a, E>,
    delay_hint: DelayHint<'a, E>,
    on_retry: OnRetry<'a, E>,
}

impl<'a, E> Retry<'a, E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: Box::new(|_| true),
            delay_hint: Box::new(|_| None),
            on_retry: Box::new(|_, _, _| {}),
        }
    }

    /// Errors for which this returns false are returned immediately.
    pub fn should_retry(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.should_retry = Box::new(f);
        self
    }

    /// Per-error delay hint, e.g. a provider's `retry_after`.
    pub fn delay_hint(mut self, f: impl Fn(&E) -> Option<Duration> + Send + Sync + 'a) -> Self {
        self.delay_hint = Box::new(f);
        self
    }

    /// Called with the failed attempt number and the upcoming delay.
    pub fn on_retry(mut self, f: impl FnMut(u32, Duration, &E) + Send + 'a) -> Self {
        self.on_retry = Box::new(f);
        self
    }

    /// Run `op` (given the 1-based attempt number) until it succeeds, fails
    /// with a non-retryable error, or the budget is spent.
    pub async fn run<T, F, Fut>(mut self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !(self.should_retry)(&err) || attempt >= attempts {
                        return Err(err);
                    }
                    let delay = self
                        .policy
                        .delay_with_hint(attempt, (self.delay_hint)(&err));
                    (self.on_retry)(attempt, delay, &err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Run `op` under `policy`; see [`Retry`] for the hint-aware variant.
pub async fn with_retry<'a, T, E, F, Fut>(
    policy: &RetryPolicy,
    op: F,
    should_retry: impl Fn(&E) -> bool + Send + Sync + 'a,
    on_retry: impl FnMut(u32, Duration, &E) + Send + 'a,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::new(policy.clone())
        .should_retry(should_retry)
        .on_retry(on_retry)
        .run(op)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const BASE: Duration = Duration::from_millis(1_000);
    const MAX: Duration = Duration::from_millis(60_000);

    #[test]
    fn exponential_doubles_and_caps() {
        let d = |n| compute_delay(n, BASE, MAX, BackoffStrategy::Exponential);
        assert_eq!(d(1), Duration::from_millis(1_000));
        assert_eq!(d(2), Duration::from_millis(2_000));
        assert_eq!(d(3), Duration::from_millis(4_000));
        assert_eq!(d(7), MAX);
        assert_eq!(d(64), MAX);
    }

    #[test]
    fn linear_and_fixed() {
        assert_eq!(
            compute_delay(3, BASE, MAX, BackoffStrategy::Linear),
            Duration::from_millis(3_000)
        );
        assert_eq!(compute_delay(100, BASE, MAX, BackoffStrategy::Linear), MAX);
        assert_eq!(compute_delay(9, BASE, MAX, BackoffStrategy::Fixed), BASE);
    }

    #[test]
    fn hint_replaces_smaller_delay_but_stays_capped() {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay_with_hint(3, Some(Duration::from_millis(10))),
            Duration::from_millis(4_000)
        );
        assert_eq!(policy.delay_with_hint(1, Some(Duration::from_secs(600))), MAX);
    }

    proptest::proptest! {
        #[test]
        fn jittered_delay_within_bounds(attempt in 1u32..12) {
            let policy = RetryPolicy::default();
            let nominal = compute_delay(attempt, BASE, MAX, BackoffStrategy::Exponential);
            let d = policy.delay_for(attempt);
            proptest::prop_assert!(d <= MAX);
            proptest::prop_assert!(d.as_millis() >= nominal.as_millis() * 3 / 4);
            proptest::prop_assert!(d.as_millis() < nominal.as_millis() * 5 / 4 + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_growing_delays() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let delays = Mutex::new(Vec::new());
        let policy = RetryPolicy::default();

        let start = tokio::time::Instant::now();
        let out = with_retry(
            &policy,
            |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("503")
                } else {
                    Ok("msg-1")
                }
            },
            |_| true,
            |_, delay, _| delays.lock().unwrap().push(delay),
        )
        .await;

        assert_eq!(out, Ok("msg-1"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let delays = delays.into_inner().unwrap();
        assert_eq!(delays.len(), 2);
        assert!((750..1250).contains(&delays[0].as_millis()));
        assert!((1500..2500).contains(&delays[1].as_millis()));
        assert_eq!(start.elapsed(), delays[0] + delays[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), &str> = with_retry(
            &RetryPolicy::default(),
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("400")
            },
            |e| *e != "400",
            |_, _, _| panic!("must not retry"),
        )
        .await;
        assert_eq!(out, Err("400"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let out: Result<(), u32> = Retry::new(RetryPolicy::default())
            .run(|attempt| async move { Err(attempt) })
            .await;
        assert_eq!(out, Err(3));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_hint_is_honoured() {
        let start = tokio::time::Instant::now();
        let out: Result<(), &str> = Retry::new(RetryPolicy::new(2, BASE, MAX))
            .delay_hint(|_| Some(Duration::from_secs(10)))
            .run(|_| async { Err("429") })
            .await;
        assert!(out.is_err());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}
