//! Wiring shared by the two binaries.

use std::sync::Arc;

use crate::batch::BatchRunner;
use crate::config::AppConfig;
use crate::error::{ConfigError, TaskError};
use crate::pipeline::{Criticality, FnTask, Pipeline, TaskOutput};
use crate::status::StatusRecorder;
use crate::store::{DocumentStore, FileStore};
use crate::tasks::{
    AccountHealthTask, GraphTokenExchange, PruneStatusTask, PublishDuePostsTask, PublisherRegistry,
    RefreshTokensTask,
};

/// Open the file store under the configured data directory.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>, TaskError> {
    let store = FileStore::open(&config.data_dir).await?;
    Ok(Arc::new(store))
}

/// Build the token refresh task. Fails when the app credentials are missing.
pub fn refresh_task(
    config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    run_id: &str,
) -> Result<RefreshTokensTask, TaskError> {
    let credentials = config.require_facebook_credentials()?;
    let exchange = GraphTokenExchange::new(
        config.graph_api_base(),
        credentials,
        config.timeout_config().request_timeout,
    )
    .map_err(|err| TaskError::other(format!("failed to build HTTP client: {}", err)))?;

    Ok(RefreshTokensTask::new(
        store,
        Arc::new(exchange),
        BatchRunner::new(config.runner_config(), run_id),
        config.retry_policy(),
        config.refresh_threshold(),
    ))
}

/// The scheduled pipeline: publish due posts (critical), then refresh
/// tokens, check account health and prune status history.
///
/// Missing app credentials only fail the refresh step.
pub fn scheduled_pipeline(
    config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    run_id: &str,
) -> Result<Pipeline, TaskError> {
    let registry = PublisherRegistry::standard(
        config.graph_api_base(),
        config.timeout_config().request_timeout,
    )
    .map_err(|err| TaskError::other(format!("failed to build HTTP client: {}", err)))?;

    let pipeline = Pipeline::new(run_id).task(PublishDuePostsTask::new(
        Arc::clone(&store),
        registry,
        BatchRunner::new(config.runner_config(), run_id),
        config.retry_policy(),
    ));

    let pipeline = match refresh_task(config, Arc::clone(&store), run_id) {
        Ok(task) => pipeline.task(task),
        Err(TaskError::Config(ConfigError::Missing(var))) => pipeline.task(FnTask::new(
            RefreshTokensTask::NAME,
            Criticality::NonCritical,
            move || async move { Err::<TaskOutput, _>(TaskError::from(ConfigError::Missing(var))) },
        )),
        Err(err) => return Err(err),
    };

    Ok(pipeline
        .task(AccountHealthTask::new(
            Arc::clone(&store),
            BatchRunner::new(config.runner_config(), run_id),
            config.refresh_threshold(),
        ))
        .task(PruneStatusTask::new(
            Arc::clone(&store),
            config.status_retention(),
        ))
        .with_recorder(StatusRecorder::new(store, run_id)))
}
