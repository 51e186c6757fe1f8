//! Command implementations

pub mod analyze;
pub mod gate;
pub mod watch;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use volguard::sources::{
    CalendarSource, FileCalendar, FileMarketData, FileParticipantFlow, NseParticipantSource,
    ParticipantFlowSource, TradingViewCalendar,
};
use volguard::{AnalysisEngine, Config};

/// Where run inputs come from
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    pub data_dir: Option<String>,
    pub as_of: Option<DateTime<Utc>>,
    pub live_calendar: bool,
    pub live_participants: bool,
}

/// Load the config file if present, otherwise defaults with env overrides
pub fn load_config(path: &str, data_dir: Option<&str>) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let config = Config::from_file(path)?;
        info!("Loaded configuration from: {}", path);
        config
    } else {
        info!("No config at {}, using defaults", path);
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config
    };

    if let Some(dir) = data_dir {
        info!("Overriding data directory to: {}", dir);
        config.engine.data_dir = dir.to_string();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn calendar_source(config: &Config, live: bool) -> Result<Arc<dyn CalendarSource>> {
    if live {
        info!(
            "Using live calendar for {:?}, {} days ahead",
            config.engine.calendar_countries, config.engine.calendar_days_ahead
        );
        Ok(Arc::new(TradingViewCalendar::new(
            config.calendar.clone(),
            config.engine.calendar_countries.clone(),
            config.engine.calendar_days_ahead,
        )?))
    } else {
        Ok(Arc::new(FileCalendar::new(
            Path::new(&config.engine.data_dir).join("events.json"),
        )))
    }
}

pub fn build_engine(config: Config, options: &SourceOptions) -> Result<AnalysisEngine> {
    let data_dir = config.engine.data_dir.clone();

    let mut market = FileMarketData::new(&data_dir, &config.engine.underlying);
    if let Some(as_of) = options.as_of {
        market = market.with_as_of(as_of);
    }

    let calendar = calendar_source(&config, options.live_calendar)?;

    let participants: Arc<dyn ParticipantFlowSource> = if options.live_participants {
        info!("Using NSE participant open interest archive");
        Arc::new(NseParticipantSource::new(config.participant.lookback + 1)?)
    } else {
        Arc::new(FileParticipantFlow::new(
            Path::new(&data_dir).join("participant_flow.csv"),
        ))
    };

    Ok(AnalysisEngine::new(
        config,
        Arc::new(market),
        calendar,
        participants,
    )?)
}

/// Human-readable summary of one outcome
pub fn print_summary(outcome: &volguard::AnalysisOutcome) {
    let mandate = &outcome.mandate;
    let regime = &mandate.regime;
    let metrics = &outcome.metrics;

    println!("\n{}", "=".repeat(60));
    println!("VOLATILITY REGIME ANALYSIS: {}", mandate.underlying);
    println!("{}", "=".repeat(60));
    println!("Generated at:       {}", mandate.generated_at.to_rfc3339());
    println!("Regime:             {} ({:.1})", regime.label, regime.composite);
    println!("Confidence:         {:.0}%", regime.confidence * 100.0);
    println!();
    println!("Realized Vol:       {:.2}%", metrics.realized_vol);
    println!("Parkinson Vol:      {:.2}%", metrics.parkinson_vol);
    println!(
        "Conditional Vol:    {:.2}% ({:?})",
        metrics.conditional_vol, metrics.conditional_model
    );
    println!("Vol of Vol:         {:.2}", metrics.vol_of_vol);
    println!("ATM IV:             {:.2}%", metrics.atm_iv);
    println!("IV Percentile:      {:.1}", metrics.iv_percentile);
    println!("IV-RV Spread:       {:+.2}", metrics.iv_rv_spread);
    println!("Flow:               {}", outcome.flow.context);
    println!();
    println!(
        "Gate:               {}",
        if mandate.gate.vetoed { "VETOED" } else { "open" }
    );
    println!("                    {}", mandate.gate.reason);
    println!("Strategy:           {}", mandate.template.name());
    if let Some(plan) = mandate.template.plan() {
        for leg in &plan.legs {
            println!("  {:?} {:?} {:.0}", leg.side, leg.kind, leg.strike);
        }
        println!(
            "  {} lots x {} = {} qty, max loss {}",
            plan.lots, plan.lot_size, plan.quantity, plan.max_loss
        );
    }
    for line in &mandate.rationale {
        println!("  - {}", line);
    }
    for warning in &mandate.warnings {
        println!("  ! {}", warning);
    }
    println!("{}", "=".repeat(60));
}
