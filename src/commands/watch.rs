//! Scheduled analysis loop with a read-only broadcaster
//!
//! Each tick launches an automatic run; a tick that lands while a run is
//! still in flight is skipped. The broadcaster only ever reads the latest
//! published outcome and persists each new mandate once.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use volguard::state_manager::{create_state_manager, SqliteStateManager};
use volguard::{AnalysisEngine, EngineError, RunMode};

use super::{build_engine, load_config, SourceOptions};

pub fn run(config_path: String, options: SourceOptions, persist: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { run_async(config_path, options, persist).await })
}

async fn run_async(config_path: String, options: SourceOptions, persist: bool) -> Result<()> {
    info!("🚀 Starting analysis loop");
    let config = load_config(&config_path, options.data_dir.as_deref())?;
    let config_hash = config.fingerprint();
    let analysis_every = Duration::from_secs(config.engine.analysis_interval_secs.max(1));
    let broadcast_every = Duration::from_secs(config.engine.broadcast_interval_secs.max(1));
    let limit = Duration::from_secs(config.engine.run_timeout_secs);

    let state = if persist {
        Some(create_state_manager(&config.engine.state_db).context("Failed to open state db")?)
    } else {
        None
    };

    info!("Analysis interval: {}s", analysis_every.as_secs());
    info!("Broadcast interval: {}s", broadcast_every.as_secs());

    let engine = Arc::new(build_engine(config, &options)?);

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Ctrl+C received - shutting down");
                shutdown_signal.notify_one();
            }
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        }
    });

    let mut analysis_tick = interval(analysis_every);
    analysis_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut broadcast_tick = interval(broadcast_every);
    broadcast_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_broadcast: Option<String> = None;

    loop {
        tokio::select! {
            _ = analysis_tick.tick() => {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { scheduled_run(&engine, limit).await });
            }
            _ = broadcast_tick.tick() => {
                broadcast(&engine, state.as_ref(), &config_hash, &mut last_broadcast);
            }
            _ = shutdown.notified() => {
                info!("✅ Shutdown complete");
                break;
            }
        }
    }

    Ok(())
}

async fn scheduled_run(engine: &AnalysisEngine, limit: Duration) {
    match engine.run_with_timeout(RunMode::Automatic, limit).await {
        Ok(_) => {}
        Err(EngineError::ConcurrentRunRejected) => {
            info!("Previous analysis still running, skipping this tick");
        }
        Err(e) if e.is_transient() => warn!("Analysis run failed (transient): {}", e),
        Err(e) => error!("Analysis run failed: {}", e),
    }
}

fn broadcast(
    engine: &AnalysisEngine,
    state: Option<&SqliteStateManager>,
    config_hash: &str,
    last: &mut Option<String>,
) {
    let Some(outcome) = engine.latest() else {
        return;
    };
    let mandate = &outcome.mandate;
    if last.as_deref() == Some(mandate.fingerprint.as_str()) {
        return;
    }

    info!(
        regime = %mandate.regime.label,
        composite = mandate.regime.composite,
        template = mandate.template.name(),
        vetoed = mandate.gate.vetoed,
        "📡 new mandate"
    );
    if let Some(state) = state {
        if let Err(e) = state.save_outcome(&outcome, config_hash) {
            error!("Failed to persist analysis: {}", e);
        }
    }
    *last = Some(mandate.fingerprint.clone());
}
