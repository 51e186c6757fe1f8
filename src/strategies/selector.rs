//! Regime x veto state machine and template resolution

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::config::{StrategyConfig, StrikeRule, TemplateConfig, VolSource};
use super::strikes::{self, StrikeGrid};
use super::{Leg, LegSide, NoTradeReason, SpreadSide, StrategyMandate, StrategyTemplate, TradePlan};
use crate::analytics::VolatilityMetrics;
use crate::calendar::GateState;
use crate::error::{EngineError, EngineResult};
use crate::participant::{FlowDirection, ParticipantFlow};
use crate::regime::{RegimeLabel, RegimeScore};
use crate::types::{MarketSnapshot, OptionKind};

const LOW_CONFIDENCE: f64 = 0.25;

/// Template chosen before any strike is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    IronFly,
    IronCondor,
    CreditSpread,
    NoTrade(NoTradeReason),
}

/// The complete selection table over regime label x veto
pub fn transition(label: RegimeLabel, vetoed: bool) -> Selection {
    match (vetoed, label) {
        (true, _) => Selection::NoTrade(NoTradeReason::CalendarVeto),
        (false, RegimeLabel::EventDriven) => Selection::NoTrade(NoTradeReason::EventDrivenRegime),
        (false, RegimeLabel::Low | RegimeLabel::Normal) => Selection::IronFly,
        (false, RegimeLabel::Elevated) => Selection::IronCondor,
        (false, RegimeLabel::High) => Selection::CreditSpread,
    }
}

/// Market inputs needed to turn a selection into concrete strikes
pub struct MarketContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub metrics: &'a VolatilityMetrics,
    pub flow: &'a ParticipantFlow,
}

/// Strike pair for one side of the structure
struct Wing {
    short: f64,
    long: f64,
}

impl Wing {
    fn width(&self) -> f64 {
        (self.long - self.short).abs()
    }
}

pub struct StrategySelector<'a> {
    config: &'a StrategyConfig,
}

impl<'a> StrategySelector<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        StrategySelector { config }
    }

    pub fn select(
        &self,
        regime: &RegimeScore,
        gate: &GateState,
        market: &MarketContext<'_>,
    ) -> EngineResult<StrategyMandate> {
        let selection = transition(regime.label, gate.vetoed);

        let template = match selection {
            Selection::NoTrade(reason) => StrategyTemplate::NoTrade { reason },
            Selection::IronFly => self.resolve(selection, &self.config.iron_fly, market)?,
            Selection::IronCondor => self.resolve(selection, &self.config.iron_condor, market)?,
            Selection::CreditSpread => self.resolve(selection, &self.config.credit_spread, market)?,
        };

        info!(
            regime = %regime.label,
            vetoed = gate.vetoed,
            template = template.name(),
            "strategy selected"
        );

        let mandate = StrategyMandate {
            generated_at: market.snapshot.timestamp,
            underlying: market.snapshot.underlying.clone(),
            rationale: rationale(regime, gate, market.flow, &template),
            warnings: warnings(regime, gate, market.metrics),
            template,
            regime: regime.clone(),
            gate: gate.clone(),
            fingerprint: String::new(),
        };
        Ok(mandate.sealed())
    }

    fn pricing_vol(&self, metrics: &VolatilityMetrics) -> f64 {
        match self.config.vol_source {
            VolSource::Conditional => metrics.conditional_vol,
            VolSource::Realized => metrics.realized_vol,
            VolSource::AtmImplied => metrics.atm_iv,
        }
    }

    fn resolve(
        &self,
        selection: Selection,
        template: &TemplateConfig,
        market: &MarketContext<'_>,
    ) -> EngineResult<StrategyTemplate> {
        let cfg = self.config;
        let snapshot = market.snapshot;
        let (Some(expiry), Some(days)) = (snapshot.nearest_expiry(), snapshot.days_to_expiry())
        else {
            return Err(EngineError::insufficient("option_chain", 1, 0));
        };

        let spot = snapshot.spot;
        let vol = self.pricing_vol(market.metrics);
        let expected_move = strikes::expected_move(spot, vol, days);
        let grid = StrikeGrid::from_chain(
            &snapshot.front_chain(),
            cfg.default_strike_interval,
            cfg.min_strike_oi,
        );
        let min_wing = cfg.min_wing_intervals as f64 * grid.interval;

        let (call, put) = match template.strike_rule {
            StrikeRule::StdDevMultiple { short, wing } => {
                let factor = strikes::wing_factor(market.metrics.iv_percentile);
                let width = strikes::round_to(wing * expected_move * factor, grid.interval).max(min_wing);
                let offset = short * expected_move;
                let (short_call, short_put) = if offset < grid.interval / 2.0 {
                    let strike = grid.snap_shared(spot);
                    (strike, strike)
                } else {
                    uncrossed(
                        &grid,
                        grid.snap(spot + offset, OptionKind::Call),
                        grid.snap(spot - offset, OptionKind::Put),
                    )
                };
                (
                    Wing {
                        short: short_call,
                        long: short_call + width,
                    },
                    Wing {
                        short: short_put,
                        long: short_put - width,
                    },
                )
            }
            StrikeRule::Delta { short, long } => {
                let at = |delta: f64, kind: OptionKind| {
                    strikes::delta_strike(spot, vol, days, delta, kind)
                        .map(|k| grid.snap(k, kind))
                        .ok_or_else(|| EngineError::insufficient("pricing_vol", 1, 0))
                };
                let (short_call, short_put) =
                    uncrossed(&grid, at(short, OptionKind::Call)?, at(short, OptionKind::Put)?);
                (
                    Wing {
                        short: short_call,
                        long: at(long, OptionKind::Call)?.max(short_call + min_wing),
                    },
                    Wing {
                        short: short_put,
                        long: at(long, OptionKind::Put)?.min(short_put - min_wing),
                    },
                )
            }
        };

        let (legs, wing_width, spread_side) = match selection {
            Selection::CreditSpread => match market.flow.direction {
                FlowDirection::Bullish => (
                    vec![
                        leg(OptionKind::Put, LegSide::Sell, put.short),
                        leg(OptionKind::Put, LegSide::Buy, put.long),
                    ],
                    put.width(),
                    Some(SpreadSide::BullPut),
                ),
                FlowDirection::Bearish | FlowDirection::Neutral => (
                    vec![
                        leg(OptionKind::Call, LegSide::Sell, call.short),
                        leg(OptionKind::Call, LegSide::Buy, call.long),
                    ],
                    call.width(),
                    Some(SpreadSide::BearCall),
                ),
            },
            _ => (
                vec![
                    leg(OptionKind::Call, LegSide::Sell, call.short),
                    leg(OptionKind::Put, LegSide::Sell, put.short),
                    leg(OptionKind::Call, LegSide::Buy, call.long),
                    leg(OptionKind::Put, LegSide::Buy, put.long),
                ],
                call.width().max(put.width()),
                None,
            ),
        };

        let lots = self.size(template, wing_width);
        if lots == 0 {
            warn!(wing_width, "no lot fits the risk budget");
            return Ok(StrategyTemplate::NoTrade {
                reason: NoTradeReason::RiskBudget,
            });
        }

        let quantity = lots * cfg.lot_size;
        let plan = TradePlan {
            expiry,
            days_to_expiry: days,
            spot,
            pricing_vol: vol,
            expected_move,
            strike_interval: grid.interval,
            legs,
            wing_width,
            spread_side,
            lots,
            lot_size: cfg.lot_size,
            quantity,
            capital_deployed: cfg.margin_per_lot * Decimal::from(lots),
            max_loss: decimal(wing_width) * Decimal::from(quantity),
            profit_target: template.profit_target,
            stop_loss: template.stop_loss,
        };

        Ok(match selection {
            Selection::IronFly => StrategyTemplate::IronFly(plan),
            Selection::IronCondor => StrategyTemplate::IronCondor(plan),
            _ => StrategyTemplate::CreditSpread(plan),
        })
    }

    /// Lots allowed by the size cap, the deployable capital and the per-trade loss limit
    pub fn size(&self, template: &TemplateConfig, wing_width: f64) -> u32 {
        let cfg = self.config;
        let deployment = cfg.base_capital * template.allocation;
        let by_margin = deployment
            .checked_div(cfg.margin_per_lot)
            .and_then(|lots| lots.floor().to_u32())
            .unwrap_or(0);

        let loss_per_lot = decimal(wing_width) * Decimal::from(cfg.lot_size);
        let by_loss = cfg
            .max_loss_per_trade
            .checked_div(loss_per_lot)
            .and_then(|lots| lots.floor().to_u32())
            .unwrap_or(0);

        template.max_lots.min(by_margin).min(by_loss)
    }
}

/// Short strikes with the call never below the put; a crossed pair
/// collapses onto one shared strike
fn uncrossed(grid: &StrikeGrid, short_call: f64, short_put: f64) -> (f64, f64) {
    if short_call >= short_put {
        (short_call, short_put)
    } else {
        let strike = grid.snap_shared((short_call + short_put) / 2.0);
        (strike, strike)
    }
}

fn leg(kind: OptionKind, side: LegSide, strike: f64) -> Leg {
    Leg { kind, side, strike }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

fn rationale(
    regime: &RegimeScore,
    gate: &GateState,
    flow: &ParticipantFlow,
    template: &StrategyTemplate,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Regime {} (score {:.1}, confidence {:.2})",
            regime.label, regime.composite, regime.confidence
        ),
        format!(
            "Calendar: {}",
            if gate.vetoed { gate.reason.as_str() } else { "clear" }
        ),
        format!("Flow: {} (bias {:+.2}, {})", flow.direction, flow.bias, flow.context),
    ];
    lines.extend(regime.drivers.iter().cloned());
    match template {
        StrategyTemplate::NoTrade { reason } => lines.push(format!("No trade: {}", reason)),
        other => lines.push(format!("Selected {}", other.name())),
    }
    lines
}

fn warnings(regime: &RegimeScore, gate: &GateState, metrics: &VolatilityMetrics) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(advice) = &gate.square_off {
        out.push(format!(
            "Square off before {} ahead of {}",
            advice.square_off_by.format("%Y-%m-%d %H:%M UTC"),
            advice.event_title
        ));
    }
    if regime.confidence < LOW_CONFIDENCE {
        out.push(format!(
            "Score {:.1} sits near a band boundary",
            regime.composite
        ));
    }
    if metrics.iv_rv_spread < 0.0 {
        out.push(format!(
            "Implied volatility {:.1} below realized {:.1}",
            metrics.atm_iv, metrics.realized_vol
        ));
    }
    out
}
