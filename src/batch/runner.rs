//! Batch runner

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BatchPlan, BatchRunnerConfig, Outcome, WorkItem};
use crate::error::{ItemError, RunnerError, ValidationError};
use crate::report::{FailureRecord, RunReport};
use crate::timeout::with_deadline;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct BatchRun<P, V> {
    /// Aggregate counts and failure diagnostics.
    pub report: RunReport,
    /// One outcome per executed item, in batch order.
    pub outcomes: Vec<Outcome<P, V>>,
}

impl<P, V> BatchRun<P, V> {
    /// Successful outcomes only.
    pub fn successes(&self) -> impl Iterator<Item = &Outcome<P, V>> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Failed outcomes only.
    pub fn failures(&self) -> impl Iterator<Item = &Outcome<P, V>> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Runs work items in sequential batches with concurrent fan-out inside
/// each batch.
///
/// The runner never retries; handlers wrap their own external calls in a
/// [`RetryPolicy`](crate::retry::RetryPolicy) when they need to. Item
/// failures are captured as [`Outcome::Failure`] and never abort the run.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    /// Batch sizing, concurrency and pacing.
    config: BatchRunnerConfig,
    /// Identifier stamped on every report this runner produces.
    run_id: String,
}

impl BatchRunner {
    pub fn new(config: BatchRunnerConfig, run_id: impl Into<String>) -> Self {
        Self {
            config,
            run_id: run_id.into(),
        }
    }

    pub fn config(&self) -> &BatchRunnerConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every item through `handler`.
    pub async fn run<P, V, H, Fut>(
        &self,
        label: &str,
        items: Vec<WorkItem<P>>,
        handler: H,
    ) -> Result<BatchRun<P, V>, RunnerError>
    where
        H: Fn(Arc<WorkItem<P>>) -> Fut,
        Fut: Future<Output = Result<V, ItemError>>,
    {
        self.run_validated(label, items, |_| Ok(()), handler).await
    }

    /// Validate every item first, skip the invalid ones, then run the rest.
    ///
    /// This method implements the main batch loop:
    /// 1. Records invalid items as skipped
    /// 2. Splits the remaining items into consecutive batches
    /// 3. Fans out each batch, bounded by `max_concurrency`
    /// 4. Waits for every item of the batch to settle
    /// 5. Sleeps `inter_batch_delay` before the next batch
    pub async fn run_validated<P, V, C, H, Fut>(
        &self,
        label: &str,
        items: Vec<WorkItem<P>>,
        validate: C,
        handler: H,
    ) -> Result<BatchRun<P, V>, RunnerError>
    where
        C: Fn(&WorkItem<P>) -> Result<(), ValidationError>,
        H: Fn(Arc<WorkItem<P>>) -> Fut,
        Fut: Future<Output = Result<V, ItemError>>,
    {
        self.config.validate()?;

        let mut report = RunReport::new(self.run_id.clone(), label);
        report.set_total(items.len());

        let mut runnable = Vec::with_capacity(items.len());
        for item in items {
            match validate(&item) {
                Ok(()) => runnable.push(Arc::new(item)),
                Err(ValidationError(reason)) => {
                    warn!(label, item_id = %item.id, reason = %reason, "skipping invalid work item");
                    report.record_skip(item.id, reason);
                }
            }
        }

        let plan = BatchPlan::new(runnable.len(), self.config.batch_size)?;
        let semaphore = Semaphore::new(self.config.max_concurrency);
        let mut outcomes = Vec::with_capacity(runnable.len());

        info!(
            label,
            run_id = %self.run_id,
            items = runnable.len(),
            skipped = report.skipped,
            batches = plan.batch_count(),
            "starting batch run"
        );

        for (batch_index, range) in plan.batches().enumerate() {
            if batch_index > 0 && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }

            report.record_batch();
            debug!(label, batch = batch_index, size = range.len(), "batch started");

            let mut in_flight: FuturesUnordered<_> = runnable[range]
                .iter()
                .cloned()
                .map(|item| self.execute_item(item, &handler, &semaphore))
                .collect();

            // Barrier: drain the whole batch before moving on.
            while let Some(outcome) = in_flight.next().await {
                record_outcome(&mut report, &outcome, batch_index as u32, label);
                outcomes.push(outcome);
            }
        }

        report.finish();
        info!(
            label,
            run_id = %self.run_id,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            duration_ms = report.duration().as_millis() as u64,
            "batch run complete"
        );

        Ok(BatchRun { report, outcomes })
    }

    async fn execute_item<P, V, H, Fut>(
        &self,
        item: Arc<WorkItem<P>>,
        handler: &H,
        semaphore: &Semaphore,
    ) -> Outcome<P, V>
    where
        H: Fn(Arc<WorkItem<P>>) -> Fut,
        Fut: Future<Output = Result<V, ItemError>>,
    {
        // The semaphore is owned by this run and never closed.
        let _permit = semaphore.acquire().await.ok();

        let start = Instant::now();
        let result = with_deadline(
            self.config.timeout_config.call_timeout,
            handler(Arc::clone(&item)),
        )
        .await;
        let duration = start.elapsed();

        match result {
            Ok(value) => Outcome::Success {
                item,
                value,
                duration,
            },
            Err(error) => Outcome::Failure {
                attempts: error.attempts,
                item,
                error,
                duration,
            },
        }
    }
}

fn record_outcome<P, V>(report: &mut RunReport, outcome: &Outcome<P, V>, batch: u32, label: &str) {
    match outcome {
        Outcome::Success { item, duration, .. } => {
            debug!(
                label,
                item_id = %item.id,
                duration_ms = duration.as_millis() as u64,
                "item succeeded"
            );
            report.record_success();
        }
        Outcome::Failure {
            item,
            error,
            duration,
            attempts,
        } => {
            warn!(
                label,
                item_id = %item.id,
                attempts,
                error = %error,
                "item failed"
            );
            report.record_failure(FailureRecord {
                item_id: item.id.clone(),
                error: error.message.clone(),
                attempts: *attempts,
                duration_ms: duration.as_millis() as u64,
                batch,
            });
        }
    }
}
