//! Strategy template configuration

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// How short and long strikes are placed relative to spot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrikeRule {
    /// Multiples of the expected move to expiry; `short` 0 means at the money
    StdDevMultiple { short: f64, wing: f64 },
    /// Absolute Black-Scholes deltas of the short and long legs
    Delta { short: f64, long: f64 },
}

/// Volatility used to price strikes and wing widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolSource {
    Conditional,
    Realized,
    AtmImplied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub strike_rule: StrikeRule,

    /// Maximum lots for this template (size cap)
    pub max_lots: u32,

    /// Fraction of base capital the template may deploy
    pub allocation: Decimal,

    /// Close at this fraction of the credit received (default: 0.50)
    pub profit_target: f64,

    /// Close when the loss reaches this multiple of the credit (default: 1.0)
    pub stop_loss: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub base_capital: Decimal,
    pub max_loss_per_trade: Decimal,
    pub margin_per_lot: Decimal,
    pub lot_size: u32,
    pub vol_source: VolSource,

    /// Strike spacing assumed when the chain does not reveal one
    pub default_strike_interval: f64,
    /// Minimum open interest for a listed strike to be preferred
    pub min_strike_oi: f64,
    pub min_wing_intervals: u32,

    pub iron_fly: TemplateConfig,
    pub iron_condor: TemplateConfig,
    pub credit_spread: TemplateConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_capital: dec!(1000000),
            max_loss_per_trade: dec!(150000),
            margin_per_lot: dec!(100000),
            lot_size: 75,
            vol_source: VolSource::Conditional,
            default_strike_interval: 50.0,
            min_strike_oi: 1_000.0,
            min_wing_intervals: 2,
            iron_fly: TemplateConfig {
                strike_rule: StrikeRule::StdDevMultiple {
                    short: 0.0,
                    wing: 1.0,
                },
                max_lots: 4,
                allocation: dec!(0.40),
                profit_target: 0.50,
                stop_loss: 1.0,
            },
            iron_condor: TemplateConfig {
                strike_rule: StrikeRule::Delta {
                    short: 0.16,
                    long: 0.05,
                },
                max_lots: 3,
                allocation: dec!(0.30),
                profit_target: 0.50,
                stop_loss: 1.0,
            },
            credit_spread: TemplateConfig {
                strike_rule: StrikeRule::Delta {
                    short: 0.30,
                    long: 0.10,
                },
                max_lots: 2,
                allocation: dec!(0.20),
                profit_target: 0.50,
                stop_loss: 1.0,
            },
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.base_capital <= Decimal::ZERO
            || self.max_loss_per_trade <= Decimal::ZERO
            || self.margin_per_lot <= Decimal::ZERO
        {
            return invalid("capital, max loss and margin per lot must be positive".into());
        }
        if self.lot_size == 0 {
            return invalid("lot_size must be positive".into());
        }
        if self.default_strike_interval <= 0.0 {
            return invalid("default_strike_interval must be positive".into());
        }
        if self.min_wing_intervals == 0 {
            return invalid("min_wing_intervals must be at least 1".into());
        }

        for (name, t) in [
            ("iron_fly", &self.iron_fly),
            ("iron_condor", &self.iron_condor),
            ("credit_spread", &self.credit_spread),
        ] {
            if t.allocation <= Decimal::ZERO || t.allocation > Decimal::ONE {
                return invalid(format!("{}: allocation must be in (0, 1]", name));
            }
            if t.profit_target <= 0.0 || t.stop_loss <= 0.0 {
                return invalid(format!("{}: profit target and stop loss must be positive", name));
            }
            match t.strike_rule {
                StrikeRule::StdDevMultiple { short, wing } => {
                    if short < 0.0 || wing <= 0.0 {
                        return invalid(format!("{}: std-dev multiples must be positive", name));
                    }
                }
                StrikeRule::Delta { short, long } => {
                    if !(0.0 < long && long < short && short < 0.5) {
                        return invalid(format!(
                            "{}: deltas must satisfy 0 < long < short < 0.5",
                            name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
