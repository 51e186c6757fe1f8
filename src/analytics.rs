//! Volatility analytics
//!
//! Turns a [`MarketSnapshot`] into [`VolatilityMetrics`]: realized, range-based
//! and conditional volatility, vol-of-vol, and the implied-volatility
//! positioning measures. Every estimator is a pure function of the snapshot's
//! own history window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::AnalyticsConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators;
use crate::types::MarketSnapshot;

/// Signals that feed the regime score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    RealizedVol,
    ParkinsonVol,
    ConditionalVol,
    VolOfVol,
    IvPercentile,
    IvRvSpread,
    FlowPressure,
}

impl Estimator {
    pub const ALL: [Estimator; 7] = [
        Estimator::RealizedVol,
        Estimator::ParkinsonVol,
        Estimator::ConditionalVol,
        Estimator::VolOfVol,
        Estimator::IvPercentile,
        Estimator::IvRvSpread,
        Estimator::FlowPressure,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Estimator::RealizedVol => "realized_vol",
            Estimator::ParkinsonVol => "parkinson_vol",
            Estimator::ConditionalVol => "conditional_vol",
            Estimator::VolOfVol => "vol_of_vol",
            Estimator::IvPercentile => "iv_percentile",
            Estimator::IvRvSpread => "iv_rv_spread",
            Estimator::FlowPressure => "flow_pressure",
        }
    }

    /// Estimators that forecast volatility and can be scored against what followed
    pub fn is_forecaster(&self) -> bool {
        matches!(
            self,
            Estimator::RealizedVol | Estimator::ParkinsonVol | Estimator::ConditionalVol
        )
    }
}

impl fmt::Display for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalModel {
    Garch,
    Ewma,
}

/// Volatility estimates for one snapshot, annualized percentage points.
///
/// All values are finite. Everything except `iv_rv_spread` and
/// `iv_momentum` is non-negative; the two rank measures are in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub realized_vol: f64,
    pub parkinson_vol: f64,
    pub conditional_vol: f64,
    pub conditional_model: ConditionalModel,
    pub vol_of_vol: f64,
    pub atm_iv: f64,
    pub iv_percentile: f64,
    pub iv_rank: f64,
    pub iv_rv_spread: f64,
    pub iv_momentum: f64,
}

impl VolatilityMetrics {
    /// Raw value for a volatility estimator; flow pressure lives elsewhere
    pub fn value(&self, estimator: Estimator) -> Option<f64> {
        match estimator {
            Estimator::RealizedVol => Some(self.realized_vol),
            Estimator::ParkinsonVol => Some(self.parkinson_vol),
            Estimator::ConditionalVol => Some(self.conditional_vol),
            Estimator::VolOfVol => Some(self.vol_of_vol),
            Estimator::IvPercentile => Some(self.iv_percentile),
            Estimator::IvRvSpread => Some(self.iv_rv_spread),
            Estimator::FlowPressure => None,
        }
    }

    /// Named estimator mapping, used for persistence and display
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> = Estimator::ALL
            .iter()
            .filter_map(|e| self.value(*e).map(|v| (e.name().to_string(), v)))
            .collect();
        map.insert("atm_iv".to_string(), self.atm_iv);
        map.insert("iv_rank".to_string(), self.iv_rank);
        map.insert("iv_momentum".to_string(), self.iv_momentum);
        map
    }
}

/// Recent absolute forecast errors per forecasting estimator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistory {
    pub errors: BTreeMap<Estimator, Vec<f64>>,
}

impl PerformanceHistory {
    pub fn record(&mut self, estimator: Estimator, abs_error: f64) {
        if abs_error.is_finite() {
            self.errors.entry(estimator).or_default().push(abs_error);
        }
    }

    pub fn mean_abs_error(&self, estimator: Estimator) -> Option<f64> {
        let errors = self.errors.get(&estimator)?;
        if errors.is_empty() {
            return None;
        }
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.values().all(|e| e.is_empty())
    }
}

/// Stateless estimator suite parameterized by [`AnalyticsConfig`]
pub struct VolatilityAnalytics<'a> {
    config: &'a AnalyticsConfig,
}

impl<'a> VolatilityAnalytics<'a> {
    pub fn new(config: &'a AnalyticsConfig) -> Self {
        VolatilityAnalytics { config }
    }

    pub fn compute(&self, snapshot: &MarketSnapshot) -> EngineResult<VolatilityMetrics> {
        let cfg = self.config;
        let closes = snapshot.closes();
        let returns = indicators::log_returns(&closes);

        let realized_vol = self.realized(&closes)?;
        let parkinson_vol = self.parkinson(snapshot)?;
        let (conditional_vol, conditional_model) = self.conditional(&returns)?;

        let rv_series =
            indicators::rolling_realized_vol(&closes, cfg.realized_window, cfg.periods_per_year);
        if rv_series.len() < cfg.vov_window {
            return Err(EngineError::insufficient(
                "vol_of_vol",
                cfg.realized_window + cfg.vov_window,
                closes.len(),
            ));
        }
        let vol_of_vol = indicators::sample_std(&rv_series[rv_series.len() - cfg.vov_window..])
            .ok_or_else(|| EngineError::insufficient("vol_of_vol", cfg.vov_window, rv_series.len()))?;

        let atm_iv = atm_implied_vol(snapshot)
            .ok_or_else(|| EngineError::insufficient("atm_iv", 1, 0))?;

        let history: Vec<f64> = snapshot
            .iv_history
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        if history.len() < cfg.iv_history_min {
            return Err(EngineError::insufficient(
                "iv_percentile",
                cfg.iv_history_min,
                history.len(),
            ));
        }
        let iv_percentile = indicators::percentile_rank(&history, atm_iv).unwrap_or(50.0);
        let iv_rank = indicators::range_rank(&history, atm_iv).unwrap_or(50.0);
        let iv_momentum = self.momentum(&history, atm_iv);

        Ok(VolatilityMetrics {
            realized_vol,
            parkinson_vol,
            conditional_vol,
            conditional_model,
            vol_of_vol,
            atm_iv,
            iv_percentile,
            iv_rank,
            iv_rv_spread: atm_iv - realized_vol,
            iv_momentum,
        })
    }

    /// Forecast errors of the forecasting estimators over the snapshot's own window.
    ///
    /// Anchors sit `skill_horizon` bars apart at the end of the window; each
    /// estimator is computed on data up to its anchor and compared with the
    /// volatility realized over the following `skill_horizon` returns. A
    /// window too short for any anchor yields an empty history.
    pub fn performance_history(&self, snapshot: &MarketSnapshot) -> PerformanceHistory {
        let cfg = self.config;
        let closes = snapshot.closes();
        let horizon = cfg.skill_horizon;
        let mut history = PerformanceHistory::default();

        for k in 1..=cfg.skill_anchors {
            let Some(anchor) = (closes.len()).checked_sub(1 + k * horizon) else {
                break;
            };
            let Some(outcome) = indicators::realized_vol(
                &closes[anchor..=anchor + horizon],
                horizon,
                cfg.periods_per_year,
            ) else {
                continue;
            };

            let past = &closes[..=anchor];
            if let Ok(rv) = self.realized(past) {
                history.record(Estimator::RealizedVol, (rv - outcome).abs());
            }
            if let Ok(pk) = self.parkinson_bars(&snapshot.bars[..=anchor]) {
                history.record(Estimator::ParkinsonVol, (pk - outcome).abs());
            }
            if let Ok((cv, _)) = self.conditional(&indicators::log_returns(past)) {
                history.record(Estimator::ConditionalVol, (cv - outcome).abs());
            }
        }
        history
    }

    fn realized(&self, closes: &[f64]) -> EngineResult<f64> {
        let window = self.config.realized_window;
        indicators::realized_vol(closes, window, self.config.periods_per_year)
            .ok_or_else(|| EngineError::insufficient("realized_vol", window + 1, closes.len()))
    }

    fn parkinson(&self, snapshot: &MarketSnapshot) -> EngineResult<f64> {
        self.parkinson_bars(&snapshot.bars)
    }

    fn parkinson_bars(&self, bars: &[crate::types::Candle]) -> EngineResult<f64> {
        let cfg = self.config;
        let start = bars.len().saturating_sub(cfg.parkinson_window);
        let ranges: Vec<(f64, f64)> = bars[start..]
            .iter()
            .filter(|b| b.has_range() && b.low > 0.0)
            .map(|b| (b.high, b.low))
            .collect();

        if ranges.len() < cfg.parkinson_min_bars {
            return Err(EngineError::insufficient(
                "parkinson_vol",
                cfg.parkinson_min_bars,
                ranges.len(),
            ));
        }
        indicators::parkinson_vol(&ranges, cfg.periods_per_year)
            .ok_or_else(|| EngineError::insufficient("parkinson_vol", cfg.parkinson_min_bars, 0))
    }

    fn conditional(&self, returns: &[f64]) -> EngineResult<(f64, ConditionalModel)> {
        let cfg = self.config;
        if returns.len() < cfg.garch_min_returns.max(2) {
            return Err(EngineError::insufficient(
                "conditional_vol",
                cfg.garch_min_returns,
                returns.len(),
            ));
        }

        let forecast = match cfg.garch {
            Some(params) => indicators::garch_variance(returns, &params)
                .map(|var| (var, ConditionalModel::Garch)),
            None => indicators::ewma_variance(returns, cfg.ewma_decay)
                .map(|var| (var, ConditionalModel::Ewma)),
        };

        forecast
            .map(|(var, model)| (indicators::annualize(var.sqrt(), cfg.periods_per_year), model))
            .ok_or_else(|| {
                EngineError::insufficient("conditional_vol", cfg.garch_min_returns, returns.len())
            })
    }

    fn momentum(&self, history: &[f64], atm_iv: f64) -> f64 {
        let lookback = self.config.momentum_lookback;
        if lookback == 0 || history.len() < lookback {
            return 0.0;
        }
        let past = history[history.len() - lookback];
        if past <= 0.0 {
            return 0.0;
        }
        (atm_iv - past) / past * 100.0
    }
}

/// Mean IV of the listed strike closest to spot on the nearest expiry
pub fn atm_implied_vol(snapshot: &MarketSnapshot) -> Option<f64> {
    let front: Vec<_> = snapshot
        .front_chain()
        .into_iter()
        .filter(|q| q.iv.is_finite() && q.iv > 0.0)
        .collect();

    let atm_strike = front
        .iter()
        .map(|q| q.strike)
        .min_by(|a, b| (a - snapshot.spot).abs().total_cmp(&(b - snapshot.spot).abs()))?;

    let ivs: Vec<f64> = front
        .iter()
        .filter(|q| q.strike == atm_strike)
        .map(|q| q.iv)
        .collect();
    Some(ivs.iter().sum::<f64>() / ivs.len() as f64)
}
