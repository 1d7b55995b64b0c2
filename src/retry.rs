//! Bounded exponential backoff for provider calls
//!
//! Every provider round-trip runs through [`RetryPolicy::run`]. The caller
//! supplies a classifier; a `Fatal` classification returns immediately, a
//! `Retryable` one sleeps and tries again until the attempt budget is spent.
//! Exhaustion returns the last observed error.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// Attempt budget and backoff bounds for one kind of call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Job submission budget
    pub fn submit() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Result fetch budget (shorter initial delay)
    pub fn result() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(4))
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Run `action` until it succeeds, fails fatally or runs out of attempts
    pub async fn run<T, E, F, Fut, C>(&self, label: &str, mut action: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
        E: Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if classify(&e) == Classification::Fatal {
                        debug!(label, attempt, error = %e, "Fatal error, not retrying");
                        return Err(e);
                    }

                    if attempt >= self.max_attempts {
                        warn!(label, attempt, error = %e, "Retry budget exhausted");
                        return Err(e);
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn test_new_clamps_bounds() {
        let policy = RetryPolicy::new(0, Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> = fast(3)
            .run(
                "test",
                move || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("boom {}", n)) } else { Ok(n) }
                },
                |_| Classification::Retryable,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_returns_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = fast(5)
            .run(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("unsupported".to_string())
                },
                |_| Classification::Fatal,
            )
            .await;

        assert_eq!(result.unwrap_err(), "unsupported");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = fast(3)
            .run(
                "test",
                move || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("attempt {}", n))
                },
                |_| Classification::Retryable,
            )
            .await;

        assert_eq!(result.unwrap_err(), "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
