use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::error::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Terminal failure after the policy gave up.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: DownloadError,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or `max_attempts` attempts have been made. `on_retry` sees the number
    /// of the attempt that just failed before the policy sleeps.
    ///
    /// Once `cancel` fires no further attempt is started; the last error is
    /// returned as the terminal failure.
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
        R: FnMut(u32, &DownloadError),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.max_attempts || cancel.is_cancelled() {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            tracing::warn!(
                "attempt {}/{} failed: {}, retrying in {}ms",
                attempt,
                self.max_attempts,
                error,
                self.delay.as_millis()
            );
            on_retry(attempt, &error);

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = cancel.cancelled() => true,
            };
            if cancelled {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}
