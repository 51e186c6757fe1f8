//! Participant-wise open interest from the NSE derivatives archive
//!
//! Each daily file lists long and short contracts by client type. The
//! foreign (FII) and domestic (DII) index-future net positions are read from
//! consecutive sessions and differenced into daily flow observations.

use async_trait::async_trait;
use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use reqwest::Client;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

use super::ParticipantFlowSource;
use crate::error::ProviderError;
use crate::types::FlowObservation;

const ARCHIVE_URL: &str = "https://archives.nseindia.com/content/nsccl/fao_participant_oi_";
const IST_OFFSET_SECS: i32 = 19_800;

/// Net index-future positions of one session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantPositions {
    pub foreign_net: f64,
    pub domestic_net: f64,
}

/// Parse one participant OI file; the title line before the header is skipped
pub fn parse_participant_oi(text: &str) -> Result<ParticipantPositions, ProviderError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut header: Option<csv::StringRecord> = None;
    let mut foreign = None;
    let mut domestic = None;

    for record in reader.records() {
        let record = record?;
        if header.is_none() {
            if record.iter().any(|f| f.eq_ignore_ascii_case("Client Type")) {
                header = Some(record);
            }
            continue;
        }
        let Some(cols) = header.as_ref() else {
            continue;
        };

        let column = |name: &str| -> Result<f64, ProviderError> {
            let idx = cols
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| ProviderError::Parse(format!("missing column '{}'", name)))?;
            record
                .get(idx)
                .unwrap_or("0")
                .replace(',', "")
                .parse::<f64>()
                .map_err(|e| ProviderError::Parse(format!("{}: {}", name, e)))
        };

        let client_type = record.get(0).unwrap_or_default().to_ascii_uppercase();
        let net = || -> Result<f64, ProviderError> {
            Ok(column("Future Index Long")? - column("Future Index Short")?)
        };
        match client_type.as_str() {
            "FII" => foreign = Some(net()?),
            "DII" => domestic = Some(net()?),
            _ => {}
        }
    }

    match (foreign, domestic) {
        (None, None) => Err(ProviderError::Parse(
            "no FII or DII rows in participant file".into(),
        )),
        (f, d) => Ok(ParticipantPositions {
            foreign_net: f.unwrap_or(0.0),
            domestic_net: d.unwrap_or(0.0),
        }),
    }
}

/// Day-over-day changes between consecutive sessions, oldest first
pub fn position_deltas(mut sessions: Vec<(NaiveDate, ParticipantPositions)>) -> Vec<FlowObservation> {
    sessions.sort_by_key(|(date, _)| *date);
    sessions
        .windows(2)
        .map(|pair| {
            let (_, prev) = pair[0];
            let (date, next) = pair[1];
            FlowObservation {
                date,
                foreign: Some(next.foreign_net - prev.foreign_net),
                domestic: Some(next.domestic_net - prev.domestic_net),
            }
        })
        .collect()
}

pub struct NseParticipantSource {
    client: Client,
    sessions: usize,
    max_attempts: usize,
}

impl NseParticipantSource {
    /// `sessions` daily files are fetched, yielding `sessions - 1` observations
    pub fn new(sessions: usize) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(10))
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(NseParticipantSource {
            client,
            sessions: sessions.max(2),
            max_attempts: 15,
        })
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<Option<ParticipantPositions>, ProviderError> {
        let url = format!("{}{}.csv", ARCHIVE_URL, date.format("%d%m%Y"));
        let response = self
            .client
            .get(&url)
            .header("Accept", "text/csv")
            .send()
            .await?;
        if !response.status().is_success() {
            debug!(%date, status = %response.status(), "no participant file");
            return Ok(None);
        }
        let text = response.text().await?;
        parse_participant_oi(&text).map(Some)
    }
}

#[async_trait]
impl ParticipantFlowSource for NseParticipantSource {
    async fn observations(&self) -> Result<Vec<FlowObservation>, ProviderError> {
        let ist = FixedOffset::east_opt(IST_OFFSET_SECS)
            .ok_or_else(|| ProviderError::Unavailable("invalid IST offset".into()))?;
        let mut date = Utc::now().with_timezone(&ist).date_naive();
        let mut sessions = Vec::new();

        for _ in 0..self.max_attempts {
            if sessions.len() >= self.sessions {
                break;
            }
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                if let Some(positions) = self.fetch_day(date).await? {
                    sessions.push((date, positions));
                }
            }
            date -= Duration::days(1);
        }

        if sessions.is_empty() {
            return Err(ProviderError::Unavailable(
                "no participant files in archive window".into(),
            ));
        }
        info!(sessions = sessions.len(), "fetched participant open interest");
        Ok(position_deltas(sessions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\"Participant wise Open Interest (no. of contracts) in Equity Derivatives as on Oct 16, 2026\"\n\
Client Type,Future Index Long,Future Index Short,Future Stock Long,Future Stock Short\n\
Client,250000,180000,1000,2000\n\
DII,60000,90000,3000,1000\n\
FII,150000,110000,5000,6000\n\
Pro,40000,60000,100,200\n\
TOTAL,500000,440000,9100,9200\n";

    #[test]
    fn test_parse_participant_oi() {
        let positions = parse_participant_oi(SAMPLE).unwrap();
        assert_eq!(positions.foreign_net, 40_000.0);
        assert_eq!(positions.domestic_net, -30_000.0);
    }

    #[test]
    fn test_parse_rejects_file_without_participants() {
        let text = "Client Type,Future Index Long,Future Index Short\nPro,1,2\n";
        assert!(parse_participant_oi(text).is_err());
    }

    #[test]
    fn test_position_deltas() {
        let day = |d: u32| NaiveDate::from_ymd_opt(2026, 10, d).unwrap();
        let pos = |f: f64, d: f64| ParticipantPositions {
            foreign_net: f,
            domestic_net: d,
        };
        let deltas = position_deltas(vec![
            (day(16), pos(40_000.0, -30_000.0)),
            (day(14), pos(10_000.0, -20_000.0)),
            (day(15), pos(25_000.0, -35_000.0)),
        ]);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].date, day(15));
        assert_eq!(deltas[0].foreign, Some(15_000.0));
        assert_eq!(deltas[1].domestic, Some(5_000.0));
    }
}
