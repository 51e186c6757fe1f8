//! File-backed collaborators
//!
//! Layout of a data directory:
//! - `bars.csv`: datetime,open,high,low,close,volume (oldest first)
//! - `chain.csv`: expiry,strike,kind,iv,oi,volume
//! - `iv_history.csv`: iv (oldest first)
//! - `events.json`: array of calendar events (optional)
//! - `participant_flow.csv`: date,foreign,domestic (blank = missing)

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{CalendarSource, MarketDataProvider, ParticipantFlowSource};
use crate::error::ProviderError;
use crate::types::{Candle, CalendarEvent, FlowObservation, MarketSnapshot, OptionQuote, Symbol};

async fn read(path: &Path) -> Result<String, ProviderError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProviderError::Io(format!("{}: {}", path.display(), e)))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ProviderError> {
    let s = s.trim();
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| DateTime::<Utc>::from_naive_utc_and_offset(d.and_time(chrono::NaiveTime::MIN), Utc))
        })
        .map_err(|_| ProviderError::Parse(format!("bad datetime '{}'", s)))
}

#[derive(Debug, Deserialize)]
struct BarRow {
    datetime: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChainRow {
    expiry: NaiveDate,
    strike: f64,
    kind: String,
    iv: f64,
    oi: f64,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IvRow {
    iv: f64,
}

#[derive(Debug, Deserialize)]
struct FlowRow {
    date: NaiveDate,
    foreign: Option<f64>,
    domestic: Option<f64>,
}

pub fn parse_bars(text: &str) -> Result<Vec<Candle>, ProviderError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut bars = Vec::new();
    for (row_idx, row) in reader.deserialize::<BarRow>().enumerate() {
        let row = row?;
        let candle = Candle::new(
            parse_datetime(&row.datetime)?,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume.unwrap_or(0.0),
        )
        .map_err(|e| ProviderError::Parse(format!("bar {}: {}", row_idx + 1, e)))?;
        bars.push(candle);
    }
    bars.sort_by_key(|c| c.datetime);
    Ok(bars)
}

pub fn parse_chain(text: &str) -> Result<Vec<OptionQuote>, ProviderError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    reader
        .deserialize::<ChainRow>()
        .map(|row| -> Result<OptionQuote, ProviderError> {
            let row = row?;
            Ok(OptionQuote {
                expiry: row.expiry,
                strike: row.strike,
                kind: row.kind.parse().map_err(ProviderError::Parse)?,
                iv: row.iv,
                open_interest: row.oi,
                volume: row.volume.unwrap_or(0.0),
            })
        })
        .collect()
}

pub fn parse_iv_history(text: &str) -> Result<Vec<f64>, ProviderError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    reader
        .deserialize::<IvRow>()
        .map(|row| -> Result<f64, ProviderError> {
            let iv = row?.iv;
            if !iv.is_finite() {
                return Err(ProviderError::Parse(format!("non-finite iv value {}", iv)));
            }
            Ok(iv)
        })
        .collect()
}

pub fn parse_flows(text: &str) -> Result<Vec<FlowObservation>, ProviderError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    reader
        .deserialize::<FlowRow>()
        .map(|row| -> Result<FlowObservation, ProviderError> {
            let row = row?;
            Ok(FlowObservation {
                date: row.date,
                foreign: row.foreign,
                domestic: row.domestic,
            })
        })
        .collect()
}

/// Snapshot assembled from CSV files in a data directory
pub struct FileMarketData {
    data_dir: PathBuf,
    underlying: Symbol,
    as_of: Option<DateTime<Utc>>,
}

impl FileMarketData {
    pub fn new(data_dir: impl Into<PathBuf>, underlying: impl AsRef<str>) -> Self {
        FileMarketData {
            data_dir: data_dir.into(),
            underlying: Symbol::new(underlying),
            as_of: None,
        }
    }

    /// Pin the snapshot time for replaying stored data; without it each
    /// snapshot is stamped with its capture time
    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

#[async_trait]
impl MarketDataProvider for FileMarketData {
    async fn snapshot(&self) -> Result<MarketSnapshot, ProviderError> {
        let bars_path = self.data_dir.join("bars.csv");
        let chain_path = self.data_dir.join("chain.csv");
        let iv_history_path = self.data_dir.join("iv_history.csv");
        let (bars, chain, iv_history) = tokio::try_join!(
            read(&bars_path),
            read(&chain_path),
            read(&iv_history_path),
        )?;
        let bars = parse_bars(&bars)?;
        let chain = parse_chain(&chain)?;
        let iv_history = parse_iv_history(&iv_history)?;

        let last = bars
            .last()
            .ok_or_else(|| ProviderError::Unavailable("bars.csv has no rows".into()))?;
        let snapshot = MarketSnapshot {
            timestamp: self.as_of.unwrap_or_else(Utc::now),
            underlying: self.underlying.clone(),
            spot: last.close,
            bars,
            chain,
            iv_history,
        };
        info!(
            underlying = %snapshot.underlying,
            bars = snapshot.bars.len(),
            quotes = snapshot.chain.len(),
            "loaded snapshot from {}",
            self.data_dir.display()
        );
        Ok(snapshot)
    }
}

pub struct FileCalendar {
    path: PathBuf,
}

impl FileCalendar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCalendar { path: path.into() }
    }
}

#[async_trait]
impl CalendarSource for FileCalendar {
    async fn events(&self) -> Result<Vec<CalendarEvent>, ProviderError> {
        if !self.path.exists() {
            debug!("no calendar file at {}", self.path.display());
            return Ok(Vec::new());
        }
        let text = read(&self.path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub struct FileParticipantFlow {
    path: PathBuf,
}

impl FileParticipantFlow {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileParticipantFlow { path: path.into() }
    }
}

#[async_trait]
impl ParticipantFlowSource for FileParticipantFlow {
    async fn observations(&self) -> Result<Vec<FlowObservation>, ProviderError> {
        parse_flows(&read(&self.path).await?)
    }
}
