//! Retry with exponential backoff, and a minimum-interval rate limiter.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::error::AiError;

/// Backoff policy: `max_retries` additional attempts after the first,
/// delay multiplied by `factor` per attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, initial_delay: Duration::from_secs(1), factor: 2 }
    }
}

/// Run `op` up to `1 + max_retries` times, sleeping between attempts.
///
/// Only transient errors are retried; auth failures and malformed
/// responses propagate immediately.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient inference failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= policy.factor;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Enforces a minimum interval between calls. The first call passes
/// immediately; later callers sleep out the remainder of the window.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_call: Mutex::new(None) }
    }

    /// Wait until the interval since the previous acquire has elapsed.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, initial_delay: Duration::from_millis(1), factor: 2 }
    }

    #[tokio::test]
    async fn success_needs_one_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, AiError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_all_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::RateLimited) }
        })
        .await;
        assert!(result.is_err());
        // 1 initial + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::AuthFailed) }
        })
        .await;
        assert!(matches!(result, Err(AiError::AuthFailed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(fast_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AiError::Timeout { timeout: Duration::from_secs(30) })
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(fast_policy(0), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::RateLimited) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
