//! Run the scheduled maintenance pipeline.
//!
//! Publishes due posts, then refreshes tokens, checks account health and
//! prunes old status records. Exits 1 when configuration is invalid, the
//! data store cannot be opened, or the critical publishing step fails.

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use postcron::{app, format_report, generate_run_id, telemetry, AppConfig, TaskState};

#[derive(Parser, Debug)]
#[command(name = "scheduled-tasks")]
#[command(about = "Publish due posts and run account maintenance")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    telemetry::init();

    if let Err(err) = run().await {
        error!(error = %format!("{:#}", err), "scheduled tasks failed");
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let run_id = generate_run_id();
    info!(run_id = %run_id, data_dir = %config.data_dir.display(), "scheduled tasks starting");

    let store = app::open_store(&config)
        .await
        .context("failed to open data store")?;
    let pipeline = app::scheduled_pipeline(&config, store, &run_id)?;
    let report = pipeline.run().await;

    for task in &report.tasks {
        match task.state {
            TaskState::Completed => {
                if let Some(run) = &task.report {
                    info!("\n{}", format_report(run));
                }
                if let Some(detail) = &task.detail {
                    info!(task = %task.name, detail = %detail, "task completed");
                }
            }
            TaskState::Failed => warn!(
                task = %task.name,
                error = task.error.as_deref().unwrap_or("unknown error"),
                "task failed"
            ),
            TaskState::Pending | TaskState::Running => {
                warn!(task = %task.name, "task did not run")
            }
        }
    }

    let report = report.into_result()?;
    info!(
        run_id = %report.run_id,
        duration_ms = report.duration().as_millis() as u64,
        failed = report.failed_tasks().len(),
        "scheduled tasks finished"
    );
    Ok(())
}
