use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use super::error::RconError;

/// Fixed-delay retry. Only [`RconError::is_transient`] failures get another attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The closure receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, RconError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RconError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        kind = e.kind().as_str(),
                        "RCON operation failed permanently"
                    );
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        kind = e.kind().as_str(),
                        error = %e,
                        "RCON operation failed after max retries"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "RCON operation failed, retrying"
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn succeeds_immediately() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let result = policy.run("op", |_| async { Ok::<_, RconError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_failures_with_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(20));
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let started = Instant::now();

        let result = policy
            .run("op", move |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RconError::Timeout("read".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), _> = policy
            .run("op", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(RconError::AuthenticationRejected) }
            })
            .await;

        assert!(matches!(result, Err(RconError::AuthenticationRejected)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), _> = policy
            .run("op", move |attempt| {
                c.store(attempt, Ordering::SeqCst);
                async { Err(RconError::ConnectionRefused("nope".into())) }
            })
            .await;

        assert!(matches!(result, Err(RconError::ConnectionRefused(_))));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }
}
