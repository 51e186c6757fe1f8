//! Economic calendar fetched from TradingView's public events endpoint

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use super::CalendarSource;
use crate::calendar::classify_title;
use crate::config::CalendarConfig;
use crate::error::ProviderError;
use crate::types::CalendarEvent;

const EVENTS_URL: &str = "https://economic-calendar.tradingview.com/events";

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    result: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    date: Value,
}

pub struct TradingViewCalendar {
    client: Client,
    config: CalendarConfig,
    countries: Vec<String>,
    days_ahead: i64,
}

impl TradingViewCalendar {
    pub fn new(
        config: CalendarConfig,
        countries: Vec<String>,
        days_ahead: i64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(10))
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(TradingViewCalendar {
            client,
            config,
            countries,
            days_ahead,
        })
    }

    fn convert(&self, raw: RawEvent) -> Option<CalendarEvent> {
        let scheduled_at = event_time(&raw.date)?;
        let title = raw.title.trim().to_string();
        if title.is_empty() {
            return None;
        }
        let (kind, impact) = classify_title(&title, &self.config);
        Some(CalendarEvent {
            title,
            kind,
            scheduled_at,
            impact,
            scope: raw.country,
        })
    }
}

/// The endpoint has served both unix seconds and ISO strings
fn event_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .filter(|ts| *ts > 0)
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
        _ => None,
    }
}

#[async_trait]
impl CalendarSource for TradingViewCalendar {
    async fn events(&self) -> Result<Vec<CalendarEvent>, ProviderError> {
        let now = Utc::now();
        let from = now - Duration::days(1);
        let to = now + Duration::days(self.days_ahead);

        let response = self
            .client
            .get(EVENTS_URL)
            .header("Accept", "application/json")
            .query(&[
                ("from", from.to_rfc3339()),
                ("to", to.to_rfc3339()),
                ("countries", self.countries.join(",")),
                ("importance", "1,2,3".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "calendar endpoint refused request");
            return Err(ProviderError::Unavailable(format!(
                "calendar returned {}",
                response.status()
            )));
        }

        let body: EventsResponse = response.json().await?;
        let events: Vec<CalendarEvent> = body
            .result
            .into_iter()
            .filter_map(|raw| self.convert(raw))
            .collect();

        info!(count = events.len(), "fetched calendar events");
        Ok(events)
    }
}
