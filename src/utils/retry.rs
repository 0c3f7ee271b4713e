//! Bounded retry with a fixed delay between attempts
//!
//! Every remote call made by a backend goes through a [`RetryPolicy`]. Local work
//! (hashing, planning) never does.

use crate::cloud::CloudError;
use std::time::Duration;
use tracing::warn;

/// Retry policy shared by all provider backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// Policy from the config knobs (`max_retries`, `retry_wait_seconds`)
    pub fn from_secs(max_retries: u32, wait_seconds: u64) -> Self {
        Self::new(max_retries, Duration::from_secs(wait_seconds))
    }

    /// Single attempt, no delay
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Run `operation`, retrying failures up to `max_retries` times
    ///
    /// Errors that a retry cannot fix (see [`CloudError::is_retryable`]) are returned
    /// as-is. Once the retries are used up the last failure is wrapped in
    /// [`CloudError::RetriesExhausted`].
    pub fn run<T, F>(&self, label: &str, mut operation: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Result<T, CloudError>,
    {
        let mut attempt = 0u32;

        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(CloudError::RetriesExhausted {
                            operation: label.to_string(),
                            retries: self.max_retries,
                            source: Box::new(err),
                        });
                    }

                    warn!(
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retry #{} of {} for operation: {}",
                        attempt,
                        self.max_retries,
                        label
                    );

                    if !self.wait.is_zero() {
                        std::thread::sleep(self.wait);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(10, 30)
    }
}
