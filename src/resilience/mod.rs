//! Retry policy for chunk sends.
//!
//! Chunks are retried locally with a fixed delay between attempts; the
//! receiver never retries on the client's behalf.

use crate::errors::OnboardingError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default attempts per chunk (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry configuration with a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Error of an operation that ran out of attempts or hit a permanent failure.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Last error seen.
    pub error: OnboardingError,
}

/// Retry executor with a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation with retry logic.
    ///
    /// `on_retry` runs before each sleep with the failed attempt number and
    /// its error.
    pub async fn execute<F, Fut, T, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OnboardingError>>,
        R: FnMut(u32, &OnboardingError),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_retryable() || attempt >= max_attempts {
                        debug!(attempt, retryable = error.is_retryable(), "Giving up");
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }

                    on_retry(attempt, &error);
                    tokio::time::sleep(self.config.delay).await;
                }
            }
        }
    }
}
