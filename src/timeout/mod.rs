//! Timeout configuration and enforcement.
//!
//! Deadlines apply to individual external calls only. A call that runs past
//! its deadline fails on its own; nothing above it is cancelled.

use std::future::Future;
use std::time::Duration;

use crate::error::ItemError;

/// Configuration for per-call deadlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time allowed for a single handler invocation, retries
    /// included.
    /// Default: 120 seconds
    pub call_timeout: Duration,

    /// Maximum time allowed for one outbound HTTP request.
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Creates a TimeoutConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a TimeoutConfig with custom values.
    pub fn with_values(call_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            call_timeout,
            request_timeout,
        }
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the outbound request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Await `call`, failing with [`ItemError::timeout`] once `limit` elapses.
pub async fn with_deadline<T, Fut>(limit: Duration, call: Fut) -> Result<T, ItemError>
where
    Fut: Future<Output = Result<T, ItemError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ItemError::timeout(limit)),
    }
}
