//! Run reports.
//!
//! A [`RunReport`] summarizes one invocation of the batch runner: how many
//! items there were, how many succeeded, failed or were skipped, and why.
//! Only the runner mutates it; once the run finishes it is read-only and can
//! be serialized into a status record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic entry for one failed work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Work item identifier
    pub item_id: String,
    /// Failure message
    pub error: String,
    /// Attempts spent on the item
    pub attempts: u32,
    /// Handler duration in milliseconds
    pub duration_ms: u64,
    /// 0-based batch the item ran in
    pub batch: u32,
}

/// Entry for a work item rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub item_id: String,
    pub reason: String,
}

/// Aggregate result of one runner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier shared by every report of one process invocation
    pub run_id: String,
    /// What was run (e.g. "token_refresh")
    pub label: String,
    /// Number of work items handed to the runner
    pub total: u32,
    /// Items whose handler succeeded
    pub succeeded: u32,
    /// Items whose handler failed or timed out
    pub failed: u32,
    /// Items rejected before execution
    pub skipped: u32,
    /// Number of batches executed
    pub batches: u32,
    /// Failures in the order they were recorded
    pub failures: Vec<FailureRecord>,
    /// Skipped items in input order
    pub skips: Vec<SkipRecord>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished, if it has
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Create an empty report stamped with the current time.
    pub fn new(run_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            label: label.into(),
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            batches: 0,
            failures: Vec::new(),
            skips: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn set_total(&mut self, total: usize) {
        self.total = u32::try_from(total).unwrap_or(u32::MAX);
    }

    pub(crate) fn record_batch(&mut self) {
        self.batches = self.batches.saturating_add(1);
    }

    pub(crate) fn record_success(&mut self) {
        self.succeeded = self.succeeded.saturating_add(1);
    }

    pub(crate) fn record_failure(&mut self, failure: FailureRecord) {
        self.failed = self.failed.saturating_add(1);
        self.failures.push(failure);
    }

    pub(crate) fn record_skip(&mut self, item_id: impl Into<String>, reason: impl Into<String>) {
        self.skipped = self.skipped.saturating_add(1);
        self.skips.push(SkipRecord {
            item_id: item_id.into(),
            reason: reason.into(),
        });
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True once [`finish`](Self::finish) has been called by the runner.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// `succeeded + failed + skipped == total`.
    pub fn is_consistent(&self) -> bool {
        u64::from(self.succeeded) + u64::from(self.failed) + u64::from(self.skipped)
            == u64::from(self.total)
    }

    /// Number of items actually handed to the handler.
    pub fn processed(&self) -> u32 {
        self.succeeded.saturating_add(self.failed)
    }

    /// Wall-clock duration; measured up to now while the run is in progress.
    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Share of processed items that succeeded, between 0.0 and 1.0.
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 / processed as f64
    }

    /// True when nothing failed.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Generate a run ID using timestamp and process ID.
pub fn generate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{}-{}", millis, std::process::id())
}

/// Format a report for log output.
pub fn format_report(report: &RunReport) -> String {
    let mut output = format!("## {} ({})\n\n", report.label, report.run_id);

    output.push_str(&format!(
        "- **Items**: {} ({} succeeded, {} failed, {} skipped)\n",
        report.total, report.succeeded, report.failed, report.skipped
    ));
    output.push_str(&format!(
        "- **Success Rate**: {:.1}%\n",
        report.success_rate() * 100.0
    ));
    output.push_str(&format!("- **Batches**: {}\n", report.batches));
    output.push_str(&format!(
        "- **Duration**: {:.1}s\n",
        report.duration().as_secs_f64()
    ));

    if !report.failures.is_empty() {
        output.push_str("\n### Failures\n");
        for failure in &report.failures {
            output.push_str(&format!(
                "- **{}**: {} (attempts={}, batch={})\n",
                failure.item_id, failure.error, failure.attempts, failure.batch
            ));
        }
    }

    if !report.skips.is_empty() {
        output.push_str("\n### Skipped\n");
        for skip in &report.skips {
            output.push_str(&format!("- **{}**: {}\n", skip.item_id, skip.reason));
        }
    }

    output
}
