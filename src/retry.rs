//! Bounded retry with a fixed backoff.
//!
//! Detaching the backup volume races with the NFS server releasing its
//! lock on the export, so the detach is retried a few times before the
//! failure is reported.

use std::fmt::Display;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Number of attempts used when none is configured.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Pause between attempts used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Attempt budget and pause between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

/// Returned when every attempt failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryExhausted<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last: E,
}

impl RetryPolicy {
    /// Creates a policy; a zero budget is raised to a single attempt.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            interval,
        }
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Calls `operation` until it succeeds or the budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. The pause is only
    /// taken between attempts, never after the last one.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] carrying the final error once every
    /// attempt failed.
    pub async fn run<T, E, F>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= self.attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        budget = self.attempts,
                        error = %err,
                        "attempt failed, retrying in {}s",
                        self.interval.as_secs()
                    );
                    sleep(self.interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_INTERVAL)
    }
}
