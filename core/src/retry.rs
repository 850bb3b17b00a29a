//! Bounded retry with a fixed delay between attempts.

use std::fmt::Display;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

/// The last error returned once every attempt failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::error::Error + 'static> {
    #[source]
    pub last: E,
    pub attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    #[must_use]
    pub const fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    ///
    /// Sleeps only between attempts, never after the last one. A policy with
    /// zero attempts still runs the operation once.
    pub fn run<T, E, F>(&self, operation_name: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Display + 'static,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if self.can_retry(attempt) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        %error,
                        "attempt failed, retrying in {:?}",
                        self.delay
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryError {
                        last: error,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}
