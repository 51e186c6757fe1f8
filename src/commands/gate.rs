//! Calendar gate check without a full analysis

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use volguard::calendar::CalendarGate;

use super::{calendar_source, load_config};

pub fn run(
    config_path: String,
    data_dir: Option<String>,
    at: Option<DateTime<Utc>>,
    live_calendar: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let config = load_config(&config_path, data_dir.as_deref())?;
        let source = calendar_source(&config, live_calendar)?;
        let events = source.events().await?;
        let now = at.unwrap_or_else(Utc::now);
        info!("Evaluating {} events at {}", events.len(), now.to_rfc3339());

        let gate = CalendarGate::new(&config.calendar);
        let state = gate.evaluate(now, &events);

        println!("{}", serde_json::to_string_pretty(&state)?);
        Ok(())
    })
}
