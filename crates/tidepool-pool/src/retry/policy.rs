//! Fixed-delay retry policy

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_core::{PoolError, Result};

/// Retries an operation up to a fixed number of attempts.
///
/// Unlike an exponential backoff, every pause between attempts has the same
/// length, which keeps the worst-case time to give up predictable:
/// `(attempts - 1) * delay` plus the time spent in the attempts themselves.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tidepool_pool::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.attempts(), 3);
/// assert_eq!(policy.worst_case_delay(), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    attempts: u32,
    /// Pause between two consecutive attempts
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy making at most `attempts` attempts, `delay` apart.
    ///
    /// At least one attempt is always made.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Total number of attempts
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Total time spent sleeping if every attempt fails
    pub fn worst_case_delay(&self) -> Duration {
        self.delay.saturating_mul(self.attempts - 1)
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// On exhaustion the last error is wrapped in
    /// [`PoolError::RetryExhausted`].
    pub async fn retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.attempts => {
                    return Err(PoolError::RetryExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Default policy: 10 attempts, 1 second apart
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}
