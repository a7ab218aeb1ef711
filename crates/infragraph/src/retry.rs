//! Retry logic with exponential backoff around single provider calls.
//!
//! The default policy makes exactly one attempt: nothing is retried unless
//! the caller opts in.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// How many times to attempt a provider call, and how long to wait between attempts
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    retryable: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Retry up to `max_attempts` total attempts with exponential backoff
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
            retryable: None,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Cap for any single delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Only retry errors matching `predicate` (all errors are retryable otherwise)
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    /// Delay to wait after the given 0-indexed failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    fn is_retryable(&self, error: &anyhow::Error) -> bool {
        self.retryable.as_ref().is_none_or(|p| p(error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .field("retryable", &self.retryable.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Execute an operation under a retry policy.
///
/// `label` names the operation in log output. Returns the last error when
/// every attempt fails, or the first non-retryable error.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 >= policy.max_attempts || !policy.is_retryable(&e) {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                log::warn!(
                    "{label}: attempt {}/{} failed: {e:#}. Retrying in {}ms...",
                    attempt + 1,
                    policy.max_attempts,
                    delay.as_millis()
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
