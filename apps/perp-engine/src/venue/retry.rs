//! Retry policies with exponential backoff for venue calls.
//!
//! Every remote call goes through [`call_with_retry`], which applies a
//! per-attempt deadline and retries transient failures with jittered
//! exponential backoff before propagating the last error.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | HTTP 429/418 (Rate Limited) | HTTP 400 (Bad Request) |
//! | HTTP 5xx, 408 | HTTP 401/403 (Auth Errors) |
//! | Per-attempt timeout | Order rejected by venue |
//! | Connection reset | No position to close |

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::VenueError;

/// Retry policy for one class of venue call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter_factor,
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    retries_done: u32,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            retries_done: 0,
            max_retries: policy.max_attempts.saturating_sub(1),
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the delay before the next retry.
    ///
    /// Returns `None` once every attempt has been used.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_done >= self.max_retries {
            return None;
        }

        let base_ms = self.base_backoff_ms();
        let capped_ms = self.apply_jitter(base_ms).min(self.max_backoff_ms);
        self.retries_done += 1;

        Some(Duration::from_millis(capped_ms))
    }

    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.retries_done as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Random value in `[backoff * (1 - jitter), backoff * (1 + jitter)]`.
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;
        rand::rng().random_range(min..=max) as u64
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn retries_done(&self) -> u32 {
        self.retries_done
    }
}

/// Run `call` under a per-attempt deadline, retrying transient failures.
///
/// # Arguments
///
/// * `operation` - Name used in logs and timeout errors
/// * `policy` - Attempt count and backoff shape
/// * `timeout` - Deadline for each attempt
/// * `call` - Produces a fresh future per attempt
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error
/// once attempts are exhausted.
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut call: F,
) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut backoff = ExponentialBackoffCalculator::new(policy);

    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(VenueError::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        let Some(mut delay) = backoff.next_backoff() else {
            tracing::warn!(
                operation,
                error = %err,
                attempts = policy.max_attempts,
                "Venue call failed after all attempts"
            );
            return Err(err);
        };

        if let VenueError::RateLimited {
            retry_after_secs: Some(secs),
        } = &err
        {
            delay = delay.max(Duration::from_secs(*secs));
        }

        tracing::warn!(
            operation,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            retry = backoff.retries_done(),
            "Transient venue error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Categorize an HTTP status for a failed venue response.
#[must_use]
pub const fn categorize_status(status_code: u16) -> ErrorCategory {
    match status_code {
        429 | 418 => ErrorCategory::RateLimited,
        408 => ErrorCategory::Retryable,
        400..=499 => ErrorCategory::NonRetryable,
        500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Error is retryable (transient failure).
    Retryable,
    /// Error is not retryable (permanent failure).
    NonRetryable,
    /// Rate limited - use Retry-After if available.
    RateLimited,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);

        // Five attempts means four retries: 100ms, 200ms, 400ms, 800ms
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_max_backoff_cap() {
        let policy = RetryPolicy {
            max_attempts: 20,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 10.0,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_range() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            jitter_factor: 0.2,
            ..Default::default()
        };

        for _ in 0..100 {
            let mut backoff = ExponentialBackoffCalculator::new(&policy);
            let duration = backoff
                .next_backoff()
                .expect("first backoff should always succeed");
            assert!(
                duration >= Duration::from_millis(80) && duration <= Duration::from_millis(120),
                "Duration {duration:?} not in expected range 80-120ms"
            );
        }
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let mut backoff = ExponentialBackoffCalculator::new(&RetryPolicy::once());
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_status_categorization() {
        assert_eq!(categorize_status(429), ErrorCategory::RateLimited);
        assert_eq!(categorize_status(418), ErrorCategory::RateLimited);
        assert_eq!(categorize_status(400), ErrorCategory::NonRetryable);
        assert_eq!(categorize_status(401), ErrorCategory::NonRetryable);
        assert_eq!(categorize_status(408), ErrorCategory::Retryable);
        assert_eq!(categorize_status(503), ErrorCategory::Retryable);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = call_with_retry("test", &fast_policy(3), Duration::from_secs(1), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(VenueError::Network("reset".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> =
            call_with_retry("test", &fast_policy(3), Duration::from_secs(1), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(VenueError::NoPosition) }
            })
            .await;

        assert_eq!(result, Err(VenueError::NoPosition));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> =
            call_with_retry("test", &fast_policy(3), Duration::from_secs(1), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(VenueError::Network("down".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(VenueError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: Result<(), _> = call_with_retry(
            "slow_call",
            &fast_policy(1),
            Duration::from_millis(10),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let Err(VenueError::Timeout { operation, .. }) = result else {
            panic!("expected timeout, got {result:?}");
        };
        assert_eq!(operation, "slow_call");
    }
}
