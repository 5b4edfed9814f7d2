//! # Retry
//!
//! Module providing a `RetryPolicy` to retry remote calls with exponential backoff and jitter.
use std::fmt;
use std::future::Future;
use std::time;

use rand::Rng;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
/// A retry policy to determine how often, and after how long, a failed call is attempted again.
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries, jitter excluded.
    pub maximum_interval: Option<time::Duration>,
    /// Upper bound of the random delay added on top of every backoff interval.
    pub jitter: time::Duration,
}

/// Successful outcome of `RetryPolicy::execute`.
#[derive(Debug, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error seen once `RetryPolicy::execute` stops trying.
#[derive(Debug, PartialEq, Eq)]
pub struct GaveUp<E> {
    pub error: E,
    pub attempts: u32,
}

impl<T> Retried<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl<E> GaveUp<E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Determine the backoff interval after the given attempt number failed, jitter excluded.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .backoff_coefficient
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|multiplier| self.initial_interval.checked_mul(multiplier));

        match (candidate_interval, self.maximum_interval) {
            (Some(interval), Some(max_interval)) => std::cmp::min(interval, max_interval),
            (Some(interval), None) => interval,
            (None, Some(max_interval)) => max_interval,
            (None, None) => time::Duration::MAX,
        }
    }

    fn jitter(&self) -> time::Duration {
        if self.jitter.is_zero() {
            return time::Duration::ZERO;
        }
        self.jitter.mul_f64(rand::thread_rng().gen::<f64>())
    }

    /// Run `operation` until it succeeds, fails with an error `is_transient` rejects, or
    /// `max_attempts` is exhausted. The operation receives the 1-based attempt number.
    /// There is no sleep after the final attempt.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        mut operation: F,
        is_transient: C,
    ) -> Result<Retried<T>, GaveUp<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    })
                }
                Err(error) if attempt < max_attempts && is_transient(&error) => {
                    let delay = self.retry_interval(attempt).saturating_add(self.jitter());
                    warn!(attempt, max_attempts, ?delay, %error, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(GaveUp {
                        error,
                        attempts: attempt,
                    })
                }
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
    pub jitter: time::Duration,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
            jitter: time::Duration::from_secs(1),
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

    pub fn jitter(mut self, jitter: time::Duration) -> RetryPolicyBuilder {
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
