//! # Retry
//!
//! Module providing a `RetryPolicy` struct to configure retrying of external calls, along with the
//! `RetryableError` classification each retried operation's error type must provide.
use std::future::Future;
use std::time;

use rand::Rng;
use tracing::debug;

/// Classification of an error for the purposes of attempting the failed operation again.
pub trait RetryableError {
    /// Whether attempting the same operation again could resolve the error.
    fn is_retryable(&self) -> bool;

    /// A server-provided hint of how long to wait before attempting again, e.g. a Retry-After header.
    fn retry_after(&self) -> Option<time::Duration> {
        None
    }
}

#[derive(Clone, Debug)]
/// A retry policy to determine how many times, and how far apart, an operation is attempted.
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<time::Duration>,
    /// Fraction of every computed interval that is randomized, in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Determine interval for retrying at a given attempt number.
    /// If not `None`, this method will respect `preferred_retry_interval` as long as it falls within `candidate_interval <= preferred_retry_interval <= maximum_interval`.
    pub fn retry_interval(
        &self,
        attempt: u32,
        preferred_retry_interval: Option<time::Duration>,
    ) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));

        match (preferred_retry_interval, self.maximum_interval) {
            (Some(duration), Some(max_interval)) => {
                let min_interval_allowed = std::cmp::min(candidate_interval, max_interval);

                if min_interval_allowed <= duration && duration <= max_interval {
                    duration
                } else {
                    min_interval_allowed
                }
            }
            (Some(duration), None) => std::cmp::max(candidate_interval, duration),
            (None, Some(max_interval)) => std::cmp::min(candidate_interval, max_interval),
            (None, None) => candidate_interval,
        }
    }

    /// Spread an interval over `[interval * (1 - jitter), interval]` so that concurrent callers
    /// that failed together do not retry together.
    pub fn jittered(&self, interval: time::Duration) -> time::Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || interval.is_zero() {
            return interval;
        }

        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        interval.mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or `max_attempts` is
    /// reached. The operation receives the 1-based number of the attempt being made.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && error.is_retryable() => {
                    let interval = match error.retry_after() {
                        Some(preferred) => self.retry_interval(attempt, Some(preferred)),
                        None => self.jittered(self.retry_interval(attempt, None)),
                    };
                    debug!(attempt, ?interval, "operation failed with a retryable error");

                    tokio::time::sleep(interval).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
pub struct RetryPolicyBuilder {
    pub max_attempts: u32,
    pub backoff_coefficient: u32,
    pub initial_interval: time::Duration,
    pub maximum_interval: Option<time::Duration>,
    pub jitter: f64,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
            jitter: 0.2,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: time::Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> RetryPolicyBuilder {
        self.max_attempts = attempts;
        self
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn jitter(mut self, jitter: f64) -> RetryPolicyBuilder {
        self.jitter = jitter;
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
            jitter: self.jitter,
        }
    }
}
