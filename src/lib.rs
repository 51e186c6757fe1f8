//! Volatility Regime Detection & Strategy Selection
//!
//! Turns a market snapshot, an economic calendar and participant positioning
//! into a regime classification and an options strategy mandate: estimator
//! metrics, a weighted composite score, a calendar veto gate and a sized
//! trade plan. The [`engine`] module coordinates runs so that at most one is
//! in flight and readers always see the last completed result.

pub mod analytics;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod participant;
pub mod regime;
pub mod sources;
pub mod state_manager;
pub mod strategies;
pub mod types;

pub use analytics::{Estimator, PerformanceHistory, VolatilityAnalytics, VolatilityMetrics};
pub use calendar::{CalendarGate, GateState};
pub use config::Config;
pub use engine::{analyze, AnalysisEngine, AnalysisInputs, AnalysisOutcome, RunMode};
pub use error::{EngineError, EngineResult, ProviderError};
pub use participant::{FlowDirection, ParticipantFlow, ParticipantFlowAnalyzer};
pub use regime::{RegimeLabel, RegimeScore, RegimeScorer, Weights};
pub use strategies::{StrategyMandate, StrategySelector, StrategyTemplate};
pub use types::*;
