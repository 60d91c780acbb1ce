//! Retry Policy
//!
//! Exponential backoff with jitter for callers that want to retry terminal
//! requests. The connection and command client never retry on their own.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Default backoff limited to `max_attempts` retries.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Stateful backoff sequence.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    /// Start over after a success.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next retry, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        let base = self.base_delay(self.attempts);
        self.attempts += 1;
        Some(self.jitter(base))
    }

    /// Un-jittered delay for a zero-based attempt number.
    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .config
            .multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let max = self.config.max_delay.as_secs_f64();
        let secs = (self.config.initial_delay.as_secs_f64() * factor).min(max);
        if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.config.max_delay
        }
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter_factor;
        if spread <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - spread).max(0.0)..=1.0 + spread);
        delay.mul_f64(factor).max(Duration::from_millis(1))
    }
}

/// Retry `op` with backoff until it succeeds, attempts run out or `cancel`
/// fires.
///
/// Returns the last error when retries are exhausted, or `None` on
/// cancellation.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &mut ReconnectPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        let error = match op().await {
            Ok(value) => {
                policy.reset();
                return Some(Ok(value));
            }
            Err(e) => e,
        };

        let Some(delay) = policy.next_delay() else {
            return Some(Err(error));
        };

        metrics::record_reconnect();
        tracing::warn!(
            attempt = policy.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Retrying terminal request"
        );

        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let delays: Vec<u128> = (0..5)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn attempts_are_bounded_and_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_band() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            jitter_factor: 0.1,
            ..ReconnectConfig::default()
        };
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(config.clone());
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "{millis}ms out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let mut policy = ReconnectPolicy::new(no_jitter(5));
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(&mut policy, &cancel, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("down") } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Some(Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(policy.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_with_last_error() {
        let mut policy = ReconnectPolicy::new(no_jitter(1));
        let cancel = CancellationToken::new();
        let result: Option<Result<(), &str>> =
            retry_with_backoff(&mut policy, &cancel, || async { Err("still down") }).await;
        assert_eq!(result, Some(Err("still down")));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_cancel() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Option<Result<(), &str>> =
            retry_with_backoff(&mut policy, &cancel, || async { Err("down") }).await;
        assert!(result.is_none());
    }
}
