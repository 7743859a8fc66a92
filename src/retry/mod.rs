//! Retry policy and exponential backoff.
//!
//! [`BackoffPolicy`] is a pure function from a 0-indexed attempt number to a
//! delay. [`RetryPolicy`] pairs it with a retry budget and drives a fallible
//! async operation through [`RetryPolicy::execute`].

pub mod executor;

use std::time::Duration;

use rand::Rng;

pub use executor::{execute_with_retry, RetryContext};

/// Exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
///
/// Jitter is off by default. When enabled, a random fraction of the delay
/// (up to `jitter`) is subtracted, so the jittered delay is never larger than
/// the un-jittered one and never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    /// Default: 1 second
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    /// Default: 30 seconds
    pub max_delay: Duration,

    /// Fraction (0.0-1.0) of the delay that may be shaved off at random.
    /// Default: 0.0
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the given base and maximum delay and no jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Enables jitter. The fraction is clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor));

        match scaled {
            Some(delay) => delay.min(self.max_delay),
            None => self.max_delay,
        }
    }

    /// Delay with jitter applied from the supplied randomness source.
    ///
    /// Equal to [`delay`](Self::delay) when jitter is disabled.
    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let shave: f64 = rng.gen::<f64>() * self.jitter;
        delay.mul_f64(1.0 - shave)
    }
}

/// Retry budget plus backoff schedule.
///
/// Operations passed to [`RetryPolicy::execute`] must be safe to repeat. The
/// executor cannot tell whether a failed attempt partially applied its side
/// effects.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    /// Default: 3
    pub max_retries: u32,

    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a RetryPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::new(Duration::ZERO, Duration::ZERO),
        }
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.backoff.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Enables jitter on the backoff schedule.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.backoff = self.backoff.with_jitter(jitter);
        self
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
