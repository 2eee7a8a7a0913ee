//! Retry policy with exponential backoff.

use crate::error::{RemoteError, RemoteResult};
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
///
/// Only retryable failures (`Retryable`, `Unreachable`) are retried.
/// Conflicts and fatal errors are returned on the first attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with the given number of attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a policy with no retries.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Creates a policy that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Runs `op`, retrying retryable failures until the attempts run out.
    ///
    /// `operation` names the call in log output.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> RemoteResult<T>
    where
        F: FnMut() -> RemoteResult<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let mut ambiguous: Option<String> = None;

        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %err,
                        "remote call failed, retrying"
                    );
                    if !err.is_undelivered() {
                        ambiguous = Some(err.to_string());
                    }
                    attempt += 1;
                }
                // Undelivered only if no attempt may have reached the remote
                Err(err) if err.is_undelivered() => {
                    return Err(match ambiguous {
                        Some(earlier) => RemoteError::retryable(format!("{err} (after {earlier})")),
                        None => err,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
