//! Strategy templates and the mandate produced by an analysis run

pub mod config;
pub mod selector;
pub mod strikes;

pub use config::{StrategyConfig, StrikeRule, TemplateConfig, VolSource};
pub use selector::{transition, Selection, StrategySelector};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::calendar::GateState;
use crate::regime::RegimeScore;
use crate::types::{OptionKind, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoTradeReason {
    CalendarVeto,
    EventDrivenRegime,
    /// Size limits leave no room for a single lot
    RiskBudget,
}

impl fmt::Display for NoTradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoTradeReason::CalendarVeto => write!(f, "calendar veto"),
            NoTradeReason::EventDrivenRegime => write!(f, "event-driven regime"),
            NoTradeReason::RiskBudget => write!(f, "risk budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegSide {
    Sell,
    Buy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub kind: OptionKind,
    pub side: LegSide,
    pub strike: f64,
}

/// Which side a directional credit spread sells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadSide {
    BullPut,
    BearCall,
}

/// Fully resolved parameters of a tradable template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub expiry: NaiveDate,
    pub days_to_expiry: i64,
    pub spot: f64,
    /// Annualized percentage points
    pub pricing_vol: f64,
    pub expected_move: f64,
    pub strike_interval: f64,
    pub legs: Vec<Leg>,
    pub wing_width: f64,
    pub spread_side: Option<SpreadSide>,
    pub lots: u32,
    pub lot_size: u32,
    pub quantity: u32,
    pub capital_deployed: Decimal,
    /// Wing width times quantity, ignoring the credit received
    pub max_loss: Decimal,
    pub profit_target: f64,
    pub stop_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template")]
pub enum StrategyTemplate {
    IronFly(TradePlan),
    IronCondor(TradePlan),
    CreditSpread(TradePlan),
    NoTrade { reason: NoTradeReason },
}

impl StrategyTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyTemplate::IronFly(_) => "Iron Fly",
            StrategyTemplate::IronCondor(_) => "Iron Condor",
            StrategyTemplate::CreditSpread(_) => "Credit Spread",
            StrategyTemplate::NoTrade { .. } => "No-Trade",
        }
    }

    pub fn plan(&self) -> Option<&TradePlan> {
        match self {
            StrategyTemplate::IronFly(plan)
            | StrategyTemplate::IronCondor(plan)
            | StrategyTemplate::CreditSpread(plan) => Some(plan),
            StrategyTemplate::NoTrade { .. } => None,
        }
    }

    pub fn is_trade(&self) -> bool {
        self.plan().is_some()
    }
}

/// The single output of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMandate {
    pub generated_at: DateTime<Utc>,
    pub underlying: Symbol,
    pub template: StrategyTemplate,
    pub regime: RegimeScore,
    pub gate: GateState,
    pub rationale: Vec<String>,
    pub warnings: Vec<String>,
    /// SHA-256 over the mandate with this field empty
    pub fingerprint: String,
}

impl StrategyMandate {
    pub(crate) fn sealed(mut self) -> Self {
        self.fingerprint = String::new();
        let bytes = serde_json::to_vec(&self).unwrap_or_default();
        self.fingerprint = hex::encode(Sha256::digest(&bytes));
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
