//! Status records.
//!
//! After every task, and once per run, a [`StatusRecord`] is appended to the
//! store's status log so operators can see what the last cron invocations
//! did. Writing a status record is best effort: a failed write is logged and
//! never fails the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ErrorKind;
use crate::pipeline::{PipelineReport, PipelineStatus, TaskRecord, TaskState};
use crate::report::RunReport;
use crate::store::DocumentStore;

/// Current status record schema version.
pub const STATUS_SCHEMA_VERSION: u32 = 1;

/// What a status record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// One pipeline task finished.
    Task,
    /// A standalone batch run finished.
    Report,
    /// A whole pipeline finished.
    RunComplete,
}

/// One entry of the status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub kind: StatusKind,
    /// Task name, report label, or `"run"`.
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    pub recorded_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(
        run_id: impl Into<String>,
        kind: StatusKind,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: STATUS_SCHEMA_VERSION,
            run_id: run_id.into(),
            kind,
            name: name.into(),
            status: status.into(),
            error_type: None,
            error_message: None,
            duration_ms: None,
            success_rate: None,
            report: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach a run report together with its derived fields.
    pub fn with_report(mut self, report: &RunReport) -> Self {
        self.duration_ms = Some(report.duration().as_millis() as u64);
        self.success_rate = Some(report.success_rate());
        self.report = Some(report.clone());
        self
    }

    pub fn with_error(mut self, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self.error_message = Some(message.into());
        self
    }
}

/// Build the status record for a finished pipeline task.
pub fn task_status(run_id: &str, task: &TaskRecord) -> StatusRecord {
    let mut record = StatusRecord::new(run_id, StatusKind::Task, &task.name, task.state.as_label());
    record.duration_ms = Some(task.duration_ms);
    if let Some(report) = &task.report {
        record.success_rate = Some(report.success_rate());
        record.report = Some(report.clone());
    }
    if task.state == TaskState::Failed {
        record.error_type = task.error_type.clone();
        record.error_message = task.error.clone();
    }
    record
}

/// Build the run-complete status record for a pipeline.
pub fn run_status(report: &PipelineReport) -> StatusRecord {
    let failed = report.failed_tasks();
    let mut record = match report.status {
        PipelineStatus::Aborted => {
            let message = report
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "pipeline aborted".to_string());
            StatusRecord::new(&report.run_id, StatusKind::RunComplete, "run", "aborted")
                .with_error(ErrorKind::Fatal.as_label(), message)
        }
        _ if !failed.is_empty() => {
            StatusRecord::new(&report.run_id, StatusKind::RunComplete, "run", "failed")
                .with_error("failed_tasks", failed.join(", "))
        }
        _ => StatusRecord::new(&report.run_id, StatusKind::RunComplete, "run", "success"),
    };
    record.duration_ms = Some(report.duration().as_millis() as u64);
    record
}

/// Build the status record for a standalone batch run.
pub fn report_status(report: &RunReport) -> StatusRecord {
    let status = if report.all_succeeded() { "success" } else { "failed" };
    let record = StatusRecord::new(&report.run_id, StatusKind::Report, &report.label, status)
        .with_report(report);
    if report.all_succeeded() {
        record
    } else {
        record.with_error(
            ErrorKind::Permanent.as_label(),
            format!("{} of {} items failed", report.failed, report.total),
        )
    }
}

/// Appends status records to a store, logging instead of failing.
#[derive(Clone)]
pub struct StatusRecorder {
    store: Arc<dyn DocumentStore>,
    run_id: String,
}

impl StatusRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn task_complete(&self, task: &TaskRecord) {
        self.write(task_status(&self.run_id, task)).await;
    }

    pub async fn run_complete(&self, report: &PipelineReport) {
        self.write(run_status(report)).await;
    }

    pub async fn report(&self, report: &RunReport) {
        self.write(report_status(report)).await;
    }

    async fn write(&self, record: StatusRecord) {
        if let Err(err) = self.store.append_status(&record).await {
            warn!(
                run_id = %self.run_id,
                name = %record.name,
                error = %err,
                "failed to write status record"
            );
        }
    }
}
