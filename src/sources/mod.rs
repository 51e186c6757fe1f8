//! External collaborators that feed an analysis run
//!
//! The core never retries a failed fetch; errors are handed back unchanged.

pub mod files;
pub mod nse;
pub mod tradingview;

pub use files::{FileCalendar, FileMarketData, FileParticipantFlow};
pub use nse::NseParticipantSource;
pub use tradingview::TradingViewCalendar;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{CalendarEvent, FlowObservation, MarketSnapshot};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Capture a fresh snapshot stamped with the capture time; may fail with
    /// a transient error
    async fn snapshot(&self) -> Result<MarketSnapshot, ProviderError>;
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Known events; an empty set is valid
    async fn events(&self) -> Result<Vec<CalendarEvent>, ProviderError>;
}

#[async_trait]
pub trait ParticipantFlowSource: Send + Sync {
    /// Daily net position changes, any order
    async fn observations(&self) -> Result<Vec<FlowObservation>, ProviderError>;
}
