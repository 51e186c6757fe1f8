//! One explicit analysis run

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use volguard::state_manager::create_state_manager;
use volguard::RunMode;

use super::{build_engine, load_config, print_summary, SourceOptions};

pub fn run(config_path: String, options: SourceOptions, json: bool, persist: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { run_async(config_path, options, json, persist).await })
}

async fn run_async(
    config_path: String,
    options: SourceOptions,
    json: bool,
    persist: bool,
) -> Result<()> {
    info!("Starting analysis");
    let config = load_config(&config_path, options.data_dir.as_deref())?;
    let config_hash = config.fingerprint();
    let state_db = config.engine.state_db.clone();
    let limit = Duration::from_secs(config.engine.run_timeout_secs);

    let engine = build_engine(config, &options)?;
    let outcome = engine
        .run_with_timeout(RunMode::Explicit, limit)
        .await
        .context("Analysis run failed")?;

    if json {
        println!("{}", outcome.mandate.to_json()?);
    } else {
        print_summary(&outcome);
    }

    if persist {
        let state = create_state_manager(&state_db)?;
        let id = state.save_outcome(&outcome, &config_hash)?;
        info!("Saved analysis {} to {}", id, state_db);
    }

    Ok(())
}
