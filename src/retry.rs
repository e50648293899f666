//! Retry policy shared by the oracle client and the events feed.
//!
//! Max attempts, an exponential backoff function and a retryable-error
//! predicate supplied by the caller. Call sites never sleep on their own.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, factor: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay,
            factor: factor.max(1),
        }
    }

    /// Feed default: 3 retries, 2s base, doubling.
    pub fn feed_default() -> Self {
        Self::new(3, Duration::from_secs(2), 2)
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1)
    }

    /// Delay before retry number `retry` (1-based): base * factor^(retry-1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        let mult = self.factor.saturating_pow(exp);
        self.base_delay.saturating_mul(mult)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        target: "retry",
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!(target: "retry", label, attempts = attempt, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::feed_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::feed_default();
        assert_eq!(p.max_attempts, 4);
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<u32, String> = p
            .run("test", |_e: &String| true, || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("503 #{n}"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(out, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), String> = p
            .run("test", |_e: &String| true, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("503".to_string())
            })
            .await;
        assert!(out.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), String> = p
            .run("test", |e: &String| e != "invalid", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("invalid".to_string())
            })
            .await;
        assert!(out.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
