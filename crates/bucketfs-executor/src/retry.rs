//! Retry driver with exponential backoff.
//!
//! Pure: no shared state, and no side effects beyond the sleep and one
//! debug line per retry.

use std::time::Duration;

use bucketfs_types::{ApiError, Result};

/// Decides whether and how long to wait before re-issuing a request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A retry is allowed while the error is retriable and the attempt
    /// budget is not exhausted.
    pub fn should_retry(&self, err: &ApiError, attempt: u32) -> bool {
        err.is_retriable() && attempt < self.max_attempts
    }

    /// Exponential backoff seeded from the base delay: base, 2x, 4x, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }
}

/// Drive `call` through the retry policy, returning the final result
/// and how many retries were attempted.
pub fn retry_counted<T>(
    policy: &RetryPolicy,
    what: &str,
    mut call: impl FnMut() -> Result<T>,
) -> (Result<T>, u32) {
    let mut attempt = 0;
    loop {
        match call() {
            Ok(value) => return (Ok(value), attempt),
            Err(err) => {
                if !policy.should_retry(&err, attempt) {
                    return (Err(err), attempt);
                }
                std::thread::sleep(policy.delay(attempt));
                attempt += 1;
                tracing::debug!("retry {attempt} {what}");
            }
        }
    }
}

/// As [`retry_counted`], discarding the attempt count.
pub fn retry<T>(
    policy: &RetryPolicy,
    what: &str,
    call: impl FnMut() -> Result<T>,
) -> Result<T> {
    retry_counted(policy, what, call).0
}
