//! Cron-driven maintenance jobs for a social media scheduler.
//!
//! The core is a batched retrying task runner: work items are split into
//! fixed-size batches, each batch fans out with bounded concurrency, every
//! external call is retried with exponential backoff, and per-item results
//! are collected into a [`RunReport`]. Three tasks are built on it (token
//! refresh, scheduled publishing, account health) and composed into a
//! fixed [`Pipeline`].

pub mod app;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod status;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod timeout;

pub use batch::{BatchPlan, BatchRun, BatchRunner, BatchRunnerConfig, Outcome, WorkItem};
pub use crate::config::AppConfig;
pub use error::{
    ConfigError, ErrorKind, ExternalError, ItemError, PipelineError, RetryError, RunnerError,
    StoreError, TaskError, ValidationError,
};
pub use pipeline::{
    Criticality, FnTask, Pipeline, PipelineReport, PipelineStatus, Task, TaskOutput, TaskRecord,
    TaskState,
};
pub use report::{format_report, generate_run_id, FailureRecord, RunReport, SkipRecord};
pub use retry::{execute_with_retry, BackoffPolicy, RetryContext, RetryPolicy};
pub use status::{StatusKind, StatusRecord, StatusRecorder};
pub use store::{DocumentStore, FileStore, MemoryStore, WorkSource};
pub use timeout::TimeoutConfig;
