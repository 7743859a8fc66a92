//! Status history retention.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::error::TaskError;
use crate::pipeline::{Criticality, Task, TaskOutput};
use crate::store::DocumentStore;

/// Deletes status records older than the retention window.
pub struct PruneStatusTask {
    store: Arc<dyn DocumentStore>,
    /// `None` disables pruning.
    retention: Option<chrono::Duration>,
}

impl PruneStatusTask {
    pub const NAME: &'static str = "prune_status_history";

    pub fn new(store: Arc<dyn DocumentStore>, retention: Option<chrono::Duration>) -> Self {
        Self { store, retention }
    }

    /// Number of records deleted.
    pub async fn run(&self) -> Result<usize, TaskError> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        let cutoff = Utc::now() - retention;
        let pruned = self.store.prune_status(cutoff).await?;
        info!(pruned, cutoff = %cutoff, "pruned status history");
        Ok(pruned)
    }
}

#[async_trait]
impl Task for PruneStatusTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonCritical
    }

    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        if self.retention.is_none() {
            return Ok(TaskOutput::with_detail("status pruning disabled"));
        }
        let pruned = self.run().await?;
        Ok(TaskOutput::with_detail(format!("pruned {} status record(s)", pruned)))
    }
}
