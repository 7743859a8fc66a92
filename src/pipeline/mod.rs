//! Fixed-step task pipeline.
//!
//! A pipeline is an ordered list of named tasks executed strictly one after
//! another. A failing non-critical task is recorded and the pipeline moves
//! on; a failing critical task aborts everything after it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{PipelineError, TaskError};
use crate::report::RunReport;
use crate::status::StatusRecorder;

/// Whether a task's failure stops the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Critical,
    NonCritical,
}

impl Criticality {
    pub fn is_critical(&self) -> bool {
        matches!(self, Criticality::Critical)
    }
}

/// Per-task state: `Pending -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

/// Pipeline state: `Running -> {Completed | Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Completed,
    Aborted,
}

/// What a task hands back on success.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    /// Report of the batch run the task performed, if it ran one.
    pub report: Option<RunReport>,
    /// Free-form note for single-call tasks (e.g. "pruned 3 records").
    pub detail: Option<String>,
}

impl TaskOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_report(report: RunReport) -> Self {
        Self {
            report: Some(report),
            detail: None,
        }
    }

    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            report: None,
            detail: Some(detail.into()),
        }
    }
}

/// A named pipeline step.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn criticality(&self) -> Criticality;

    async fn execute(&self) -> Result<TaskOutput, TaskError>;
}

/// Adapts an async closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    criticality: Criticality,
    action: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, criticality: Criticality, action: F) -> Self {
        Self {
            name: name.into(),
            criticality,
            action,
        }
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        (self.action)().await
    }
}

/// Execution record of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub criticality: Criticality,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

impl TaskRecord {
    fn pending(name: &str, criticality: Criticality) -> Self {
        Self {
            name: name.to_string(),
            criticality,
            state: TaskState::Pending,
            error: None,
            error_type: None,
            detail: None,
            duration_ms: 0,
            report: None,
        }
    }
}

/// Result of one pipeline execution.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: String,
    pub status: PipelineStatus,
    /// One record per configured task, in pipeline order.
    pub tasks: Vec<TaskRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    error: Option<PipelineError>,
}

impl PipelineReport {
    pub fn is_aborted(&self) -> bool {
        self.status == PipelineStatus::Aborted
    }

    pub fn task(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Names of tasks that ended in [`TaskState::Failed`].
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed)
            .map(|t| t.name.as_str())
            .collect()
    }

    /// The abort error, if a critical task failed.
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// `Err` when the pipeline was aborted by a critical task.
    pub fn into_result(mut self) -> Result<PipelineReport, PipelineError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Ordered list of tasks run strictly in sequence.
pub struct Pipeline {
    run_id: String,
    tasks: Vec<Box<dyn Task>>,
    recorder: Option<StatusRecorder>,
}

impl Pipeline {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tasks: Vec::new(),
            recorder: None,
        }
    }

    /// Append a task to the end of the pipeline.
    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    /// Append a status record after every task and when the run completes.
    pub fn with_recorder(mut self, recorder: StatusRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task in order until the list is exhausted or a critical
    /// task fails.
    pub async fn run(&self) -> PipelineReport {
        let started_at = Utc::now();
        let mut records: Vec<TaskRecord> = self
            .tasks
            .iter()
            .map(|t| TaskRecord::pending(t.name(), t.criticality()))
            .collect();
        let mut abort = None;

        info!(run_id = %self.run_id, tasks = self.tasks.len(), "pipeline started");

        for (index, task) in self.tasks.iter().enumerate() {
            let name = task.name();
            records[index].state = TaskState::Running;
            info!(run_id = %self.run_id, task = name, "task started");

            let start = Instant::now();
            let result = task.execute().await;
            let record = &mut records[index];
            record.duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    record.state = TaskState::Completed;
                    record.report = output.report;
                    record.detail = output.detail;
                    info!(
                        run_id = %self.run_id,
                        task = name,
                        duration_ms = record.duration_ms,
                        "task completed"
                    );
                }
                Err(err) => {
                    record.state = TaskState::Failed;
                    record.error = Some(err.to_string());
                    record.error_type = Some(err.kind().as_label().to_string());
                    if task.criticality().is_critical() {
                        error!(run_id = %self.run_id, task = name, error = %err, "critical task failed, aborting pipeline");
                        abort = Some(PipelineError::Aborted {
                            task: name.to_string(),
                            source: err,
                        });
                    } else {
                        warn!(run_id = %self.run_id, task = name, error = %err, "non-critical task failed, continuing");
                    }
                }
            }

            if let Some(recorder) = &self.recorder {
                recorder.task_complete(&records[index]).await;
            }

            if abort.is_some() {
                break;
            }
        }

        let status = if abort.is_some() {
            PipelineStatus::Aborted
        } else {
            PipelineStatus::Completed
        };

        let report = PipelineReport {
            run_id: self.run_id.clone(),
            status,
            tasks: records,
            started_at,
            finished_at: Utc::now(),
            error: abort,
        };

        if let Some(recorder) = &self.recorder {
            recorder.run_complete(&report).await;
        }

        info!(
            run_id = %self.run_id,
            status = ?report.status,
            failed = report.failed_tasks().len(),
            "pipeline finished"
        );

        report
    }
}
