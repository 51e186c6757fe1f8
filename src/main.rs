//! volguard - main entry point
//!
//! This binary provides three subcommands:
//! - analyze: Run one analysis and print the strategy mandate
//! - watch: Run analyses on a schedule and broadcast new mandates
//! - gate: Evaluate the event calendar gate only

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::SourceOptions;

#[derive(Parser, Debug)]
#[command(name = "volguard")]
#[command(about = "Options volatility regime detection and strategy selection", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one analysis now
    Analyze {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/volguard.json")]
        config: String,

        /// Data directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Snapshot time, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,

        /// Fetch the economic calendar from TradingView
        #[arg(long)]
        live_calendar: bool,

        /// Fetch participant positions from the NSE archive
        #[arg(long)]
        live_participants: bool,

        /// Print the mandate as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Save the outcome to the state database
        #[arg(long)]
        persist: bool,
    },

    /// Run analyses on a schedule until interrupted
    Watch {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/volguard.json")]
        config: String,

        /// Data directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Fetch the economic calendar from TradingView
        #[arg(long)]
        live_calendar: bool,

        /// Fetch participant positions from the NSE archive
        #[arg(long)]
        live_participants: bool,

        /// Save each new outcome to the state database
        #[arg(long)]
        persist: bool,
    },

    /// Evaluate the calendar gate
    Gate {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/volguard.json")]
        config: String,

        /// Data directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Evaluation time, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,

        /// Fetch the economic calendar from TradingView
        #[arg(long)]
        live_calendar: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn parse_at(at: Option<String>) -> Result<Option<DateTime<Utc>>> {
    at.map(|s| {
        s.parse::<DateTime<Utc>>()
            .with_context(|| format!("Invalid --at timestamp: {}", s))
    })
    .transpose()
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Analyze { .. } => "analyze",
        Commands::Watch { .. } => "watch",
        Commands::Gate { .. } => "gate",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Analyze {
            config,
            data_dir,
            at,
            live_calendar,
            live_participants,
            json,
            persist,
        } => {
            let options = SourceOptions {
                data_dir,
                as_of: parse_at(at)?,
                live_calendar,
                live_participants,
            };
            commands::analyze::run(config, options, json, persist)
        }

        Commands::Watch {
            config,
            data_dir,
            live_calendar,
            live_participants,
            persist,
        } => {
            let options = SourceOptions {
                data_dir,
                as_of: None,
                live_calendar,
                live_participants,
            };
            commands::watch::run(config, options, persist)
        }

        Commands::Gate {
            config,
            data_dir,
            at,
            live_calendar,
        } => commands::gate::run(config, data_dir, parse_at(at)?, live_calendar),
    }
}
