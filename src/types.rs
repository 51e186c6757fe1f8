//! Core market data types consumed by the analysis core

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLC bar of the underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// Create a new bar with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// A flat bar carries no range information (illiquid or halted session)
    pub fn has_range(&self) -> bool {
        self.high > self.low
    }
}

/// Underlying instrument identifier, cheap to clone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl std::str::FromStr for OptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" | "C" | "CALL" => Ok(OptionKind::Call),
            "PE" | "P" | "PUT" => Ok(OptionKind::Put),
            other => Err(format!("unknown option kind '{}'", other)),
        }
    }
}

/// One row of the option-chain cross-section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub expiry: NaiveDate,
    pub strike: f64,
    pub kind: OptionKind,
    /// Implied volatility in percentage points
    pub iv: f64,
    pub open_interest: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Everything one analysis run knows about the market.
///
/// Captured once by the market-data provider and never mutated afterwards;
/// the run's inputs own it and the pipeline stages only borrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub underlying: Symbol,
    pub spot: f64,
    /// Oldest first
    pub bars: Vec<Candle>,
    pub chain: Vec<OptionQuote>,
    /// Trailing ATM implied volatility observations, oldest first
    pub iv_history: Vec<f64>,
}

impl MarketSnapshot {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|c| c.close).collect()
    }

    /// Nearest expiry on or after the snapshot date
    pub fn nearest_expiry(&self) -> Option<NaiveDate> {
        let today = self.timestamp.date_naive();
        self.chain
            .iter()
            .map(|q| q.expiry)
            .filter(|e| *e >= today)
            .min()
    }

    /// Quotes belonging to the nearest expiry
    pub fn front_chain(&self) -> Vec<&OptionQuote> {
        match self.nearest_expiry() {
            Some(expiry) => self.chain.iter().filter(|q| q.expiry == expiry).collect(),
            None => Vec::new(),
        }
    }

    /// Calendar days to the nearest expiry, at least one
    pub fn days_to_expiry(&self) -> Option<i64> {
        self.nearest_expiry()
            .map(|e| (e - self.timestamp.date_naive()).num_days().max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    CentralBank,
    MacroRelease,
    Expiry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImpactTier {
    Low,
    Medium,
    High,
}

/// Scheduled macro-calendar event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub kind: EventKind,
    pub scheduled_at: DateTime<Utc>,
    pub impact: ImpactTier,
    /// Country or market code, e.g. "IN", "US"
    #[serde(default)]
    pub scope: String,
}

/// Net position change of the two institutional categories for one session.
///
/// A missing category contributes zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowObservation {
    pub date: NaiveDate,
    pub foreign: Option<f64>,
    pub domestic: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 4, 0, 0).unwrap()
    }

    #[test]
    fn test_candle_validation() {
        assert!(Candle::new(ts(), 100.0, 101.0, 99.0, 100.5, 0.0).is_ok());
        assert!(matches!(
            Candle::new(ts(), 100.0, 99.0, 101.0, 100.0, 0.0),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 100.0, 101.0, 99.0, 102.0, 0.0),
            Err(CandleValidationError::CloseOutOfRange { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 0.0, 101.0, 99.0, 100.0, 0.0),
            Err(CandleValidationError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn test_flat_bar_is_valid_but_rangeless() {
        let bar = Candle::new(ts(), 100.0, 100.0, 100.0, 100.0, 0.0).unwrap();
        assert!(!bar.has_range());
    }

    #[test]
    fn test_option_kind_parsing() {
        assert_eq!("CE".parse::<OptionKind>().unwrap(), OptionKind::Call);
        assert_eq!("put".parse::<OptionKind>().unwrap(), OptionKind::Put);
        assert!("XX".parse::<OptionKind>().is_err());
    }

    #[test]
    fn test_nearest_expiry_skips_expired() {
        let quote = |d: u32| OptionQuote {
            expiry: NaiveDate::from_ymd_opt(2026, 10, d).unwrap(),
            strike: 24000.0,
            kind: OptionKind::Call,
            iv: 13.0,
            open_interest: 5000.0,
            volume: 0.0,
        };
        let snapshot = MarketSnapshot {
            timestamp: ts(),
            underlying: Symbol::new("NIFTY"),
            spot: 24000.0,
            bars: vec![],
            chain: vec![quote(14), quote(28), quote(21)],
            iv_history: vec![],
        };
        assert_eq!(
            snapshot.nearest_expiry(),
            NaiveDate::from_ymd_opt(2026, 10, 21)
        );
        assert_eq!(snapshot.days_to_expiry(), Some(2));
        assert_eq!(snapshot.front_chain().len(), 1);
    }
}
