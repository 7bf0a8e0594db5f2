//! Data-driven retry policies and the generic retry loop
//!
//! A [`RetryPolicy`] is an immutable description of how often and how fast a
//! failing unit of work is retried. Every retrying call site in the workspace
//! goes through [`execute`]; the named presets only differ in their numbers.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Jitter spread applied to a computed delay (±20%)
const JITTER_RATIO: f64 = 0.2;

/// Backoff/retry description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            factor,
            jitter,
        }
    }

    /// Fixed-interval polling, no growth and no jitter
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self::new(max_attempts, interval, interval, 1.0, false)
    }

    /// General network calls
    pub const fn network() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5), 2.0, true)
    }

    /// Fast polling while searching for a node's RPC port
    pub const fn port_discovery() -> Self {
        Self::fixed(600, Duration::from_millis(200))
    }

    /// Readiness checks against a known port
    pub const fn health_check() -> Self {
        Self::new(30, Duration::from_millis(200), Duration::from_secs(2), 1.5, false)
    }

    /// Slow external provider connections
    pub const fn provider_connect() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30), 2.0, true)
    }

    /// Re-establishing a dropped websocket
    pub const fn websocket_reconnect() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_secs(10), 2.0, true)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retrying after failed attempt `attempt` (1-based):
    /// `min(base * factor^(attempt-1), max)`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped.is_finite() {
            Duration::ZERO
        } else {
            self.max_delay
        }
    }

    /// Delay before the next attempt, randomized by ±20% when jitter is enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        delay.mul_f64(spread)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

/// Returned once every attempt allowed by the policy has failed
#[derive(Error, Debug)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryError<E: std::fmt::Display> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy's attempts are exhausted.
///
/// The operation receives the 1-based attempt number. A policy with
/// `max_attempts == 0` still runs the operation once.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("✅ Succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= max_attempts {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::trace!("⏳ Attempt {}/{} failed, retrying in {:?}: {}", attempt, max_attempts, delay, error);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1), 2.0, false);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(50), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_secs(10), 1.0, true);
        for _ in 0..200 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(800), "delay too short: {delay:?}");
            assert!(delay <= Duration::from_millis(1200), "delay too long: {delay:?}");
        }
    }

    #[test]
    fn test_jitter_can_be_disabled() {
        let policy = RetryPolicy::network().with_jitter(false);
        assert!(!policy.jitter);
        for _ in 0..50 {
            assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        }
    }

    #[test]
    fn test_presets_share_one_shape() {
        let discovery = RetryPolicy::port_discovery();
        assert_eq!(discovery.max_attempts, 600);
        assert_eq!(discovery.delay_for(1), Duration::from_millis(200));
        assert_eq!(discovery.delay_for(300), Duration::from_millis(200));

        assert_eq!(RetryPolicy::health_check().max_attempts, 30);
        assert!(RetryPolicy::network().jitter);
        assert!(RetryPolicy::provider_connect().max_delay > RetryPolicy::network().max_delay);
        assert_eq!(RetryPolicy::websocket_reconnect().with_max_attempts(3).max_attempts, 3);
    }

    #[tokio::test]
    async fn test_execute_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let result: Result<u32, RetryError<String>> = execute(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_reports_exhaustion() {
        let policy = RetryPolicy::fixed(4, Duration::from_millis(1));

        let result: Result<(), RetryError<String>> =
            execute(&policy, |attempt| async move { Err(format!("boom {attempt}")) }).await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts, 4);
        assert_eq!(error.last_error, "boom 4");
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(1));
        let result: Result<(), RetryError<&str>> = execute(&policy, |_| async { Err("nope") }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
