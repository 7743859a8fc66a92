//! Bounded batch execution.
//!
//! Work items are split into consecutive fixed-size batches. Items inside a
//! batch run concurrently; batches run one after another with a delay in
//! between so external rate limits are respected.

pub mod runner;

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ItemError, RunnerError};
use crate::timeout::TimeoutConfig;

pub use runner::{BatchRun, BatchRunner};

/// One unit of work: an identifier plus an arbitrary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<P> {
    pub id: String,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(id: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Settled result of one work item.
#[derive(Debug)]
pub enum Outcome<P, V> {
    Success {
        item: Arc<WorkItem<P>>,
        value: V,
        duration: Duration,
    },
    Failure {
        item: Arc<WorkItem<P>>,
        error: ItemError,
        duration: Duration,
        attempts: u32,
    },
}

impl<P, V> Outcome<P, V> {
    pub fn item(&self) -> &WorkItem<P> {
        match self {
            Outcome::Success { item, .. } | Outcome::Failure { item, .. } => item,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item().id
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Outcome::Success { duration, .. } | Outcome::Failure { duration, .. } => *duration,
        }
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            Outcome::Success { value, .. } => Some(value),
            Outcome::Failure { .. } => None,
        }
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&ItemError> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }
}

/// Configuration options for batched execution.
#[derive(Clone, Debug)]
pub struct BatchRunnerConfig {
    /// Items per batch.
    /// Default: 10
    pub batch_size: usize,
    /// Maximum number of items of one batch running at the same time.
    /// Default: 5
    pub max_concurrency: usize,
    /// Pause between two consecutive batches.
    /// Default: 1 second
    pub inter_batch_delay: Duration,
    /// Per-call deadline applied to every handler invocation.
    pub timeout_config: TimeoutConfig,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 5,
            inter_batch_delay: Duration::from_secs(1),
            timeout_config: TimeoutConfig::default(),
        }
    }
}

impl BatchRunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn with_timeout_config(mut self, timeout_config: TimeoutConfig) -> Self {
        self.timeout_config = timeout_config;
        self
    }

    /// Reject settings the runner cannot execute.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.batch_size == 0 {
            return Err(RunnerError::InvalidBatchSize);
        }
        if self.max_concurrency == 0 {
            return Err(RunnerError::InvalidConcurrency);
        }
        Ok(())
    }
}

/// Consecutive index ranges covering `0..item_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    item_count: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(item_count: usize, batch_size: usize) -> Result<Self, RunnerError> {
        if batch_size == 0 {
            return Err(RunnerError::InvalidBatchSize);
        }
        Ok(Self {
            item_count,
            batch_size,
        })
    }

    /// `ceil(item_count / batch_size)`.
    pub fn batch_count(&self) -> usize {
        self.item_count.div_ceil(self.batch_size)
    }

    /// Index ranges of each batch, in order. The last one may be shorter.
    pub fn batches(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.batch_count()).map(move |index| {
            let start = index * self.batch_size;
            start..(start + self.batch_size).min(self.item_count)
        })
    }
}
