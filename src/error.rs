//! Error types shared across the runner, pipeline and maintenance tasks.
//!
//! Item-level errors ([`ItemError`]) never escape the batch runner; they are
//! turned into failure outcomes. Everything else is either a setup failure
//! (configuration, store) or a task failure surfaced through the pipeline.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Returned by the retry executor once every attempt has failed.
#[derive(Error, Debug)]
#[error("{label} failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Label of the retried operation.
    pub label: String,
    /// Total attempts made, including the first one.
    pub attempts: u32,
    /// Error returned by the final attempt.
    #[source]
    pub source: E,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Consume the error and return the last underlying failure.
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Failure of a single work item, captured into an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ItemError {
    /// Human-readable failure message.
    pub message: String,
    /// Attempts spent on the item before giving up.
    pub attempts: u32,
    /// The per-call deadline cut the handler off.
    pub timed_out: bool,
}

impl ItemError {
    /// A failure that took a single attempt.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: 1,
            timed_out: false,
        }
    }

    /// Override the attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// The per-call deadline elapsed before the handler settled.
    pub fn timeout(limit: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::new(format!("timed out after {:?}", limit))
        }
    }
}

impl<E> From<RetryError<E>> for ItemError
where
    E: std::error::Error + 'static,
{
    fn from(err: RetryError<E>) -> Self {
        Self {
            message: err.to_string(),
            attempts: err.attempts,
            timed_out: false,
        }
    }
}

/// A work item failed validation and is skipped before execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid work item: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors raised while building a batch plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// Batch size must be at least one.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// Per-batch concurrency must be at least one.
    #[error("max concurrency must be greater than zero")]
    InvalidConcurrency,
}

/// Errors raised by a document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collection or document identifier is empty or escapes the store root.
    #[error("Invalid document path: {0}")]
    InvalidPath(String),
}

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a call to an external platform API.
#[derive(Error, Debug)]
pub enum ExternalError {
    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with an error status.
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The API answered successfully but the body was not understood.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    /// The platform has no implementation for this operation.
    #[error("platform '{0}' is not supported")]
    Unsupported(String),
}

impl ExternalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExternalError::Request(_) => ErrorKind::Transient,
            ExternalError::Api { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            ExternalError::Api { .. } | ExternalError::InvalidResponse(_) => ErrorKind::Permanent,
            ExternalError::Unsupported(_) => ErrorKind::Validation,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Failure of a whole pipeline task.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Category recorded in status records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Store(_) | TaskError::Config(_) => ErrorKind::Fatal,
            TaskError::Runner(_) => ErrorKind::Validation,
            TaskError::Other(_) => ErrorKind::Permanent,
        }
    }
}

/// Raised when a critical pipeline task fails.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("critical task '{task}' failed: {source}")]
    Aborted {
        task: String,
        #[source]
        source: TaskError,
    },
}

/// Fatal configuration problems detected before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is not present in the environment.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A setting is present but unusable.
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Error category used in status records and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Validation,
    Permanent,
    Fatal,
}

impl ErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
