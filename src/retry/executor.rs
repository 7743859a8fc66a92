//! Retry executor.
//!
//! Drives a fallible async operation through a [`RetryPolicy`], sleeping
//! between attempts and logging every attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::RetryPolicy;
use crate::error::RetryError;

/// Per-call retry state handed to the operation on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// 1-based number of the attempt being made.
    pub attempt: u32,
    /// Attempts allowed in total.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryContext {
    /// True when this is the last attempt the policy allows.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds or the retry budget is spent.
    ///
    /// After failure number `k` (0-indexed) the executor sleeps
    /// `backoff.delay(k)` before trying again. When every attempt fails the
    /// last error is returned wrapped in a [`RetryError`] tagged with `label`
    /// and the attempt count.
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute_when(label, |_| true, operation).await
    }

    /// Like [`execute`](Self::execute), but stops early when `should_retry`
    /// rejects an error. The returned [`RetryError`] then carries the number
    /// of attempts actually made.
    pub async fn execute_when<T, E, F, Fut, P>(
        &self,
        label: &str,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts();
        let mut ctx = RetryContext {
            attempt: 0,
            max_attempts,
            base_delay: self.backoff.base_delay,
            max_delay: self.backoff.max_delay,
        };

        loop {
            ctx.attempt += 1;

            match operation(ctx).await {
                Ok(value) => {
                    debug!(
                        label,
                        attempt = ctx.attempt,
                        max_attempts,
                        outcome = "success",
                        "attempt succeeded"
                    );
                    return Ok(value);
                }
                Err(err) if !should_retry(&err) => {
                    error!(
                        label,
                        attempt = ctx.attempt,
                        max_attempts,
                        outcome = "not_retryable",
                        error = %err,
                        "attempt failed with a permanent error"
                    );
                    return Err(RetryError {
                        label: label.to_string(),
                        attempts: ctx.attempt,
                        source: err,
                    });
                }
                Err(err) if ctx.is_last_attempt() => {
                    error!(
                        label,
                        attempt = ctx.attempt,
                        max_attempts,
                        outcome = "exhausted",
                        error = %err,
                        "all attempts failed"
                    );
                    return Err(RetryError {
                        label: label.to_string(),
                        attempts: ctx.attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    let delay = self.next_delay(ctx.attempt - 1);
                    warn!(
                        label,
                        attempt = ctx.attempt,
                        max_attempts,
                        outcome = "retrying",
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn next_delay(&self, retry: u32) -> Duration {
        if self.backoff.jitter > 0.0 {
            self.backoff.delay_with_rng(retry, &mut rand::thread_rng())
        } else {
            self.backoff.delay(retry)
        }
    }
}

/// Convenience wrapper that builds a policy from raw parameters.
pub async fn execute_with_retry<T, E, F, Fut>(
    operation: F,
    label: &str,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Result<T, RetryError<E>>
where
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    RetryPolicy::new()
        .with_max_retries(max_retries)
        .with_base_delay(base_delay)
        .with_max_delay(max_delay)
        .execute(label, operation)
        .await
}
