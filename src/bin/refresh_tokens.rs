//! Refresh OAuth tokens that expire soon.
//!
//! Configuration comes from `POSTCRON_*` environment variables only. Exits 1
//! when configuration is missing or the data store cannot be used; failures
//! of individual accounts are recorded in the run report instead.

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use postcron::{app, format_report, generate_run_id, telemetry, AppConfig, StatusRecorder};

#[derive(Parser, Debug)]
#[command(name = "refresh-tokens")]
#[command(about = "Refresh connected account tokens that are about to expire")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    telemetry::init();

    if let Err(err) = run().await {
        error!(error = %format!("{:#}", err), "token refresh failed");
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    config
        .require_facebook_credentials()
        .context("token refresh needs the Facebook app credentials")?;

    let run_id = generate_run_id();
    info!(run_id = %run_id, data_dir = %config.data_dir.display(), "token refresh starting");

    let store = app::open_store(&config)
        .await
        .context("failed to open data store")?;
    let task = app::refresh_task(&config, Arc::clone(&store), &run_id)?;
    let run = task.run().await?;

    info!("\n{}", format_report(&run.report));
    StatusRecorder::new(store, &run_id).report(&run.report).await;

    Ok(())
}
