//! Volatility indicators
//!
//! Pure numeric helpers shared by the analytics layer. Inputs are daily
//! prices or daily log returns; annualized outputs are in percentage points.

use itertools::Itertools;
use statrs::statistics::Statistics;

use crate::config::GarchParams;

/// Daily log returns of a close series, one shorter than the input
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .iter()
        .tuple_windows()
        .map(|(prev, next)| (next / prev).ln())
        .collect()
}

/// Sample standard deviation (n - 1), None below two observations
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let std = values.iter().std_dev();
    std.is_finite().then_some(std)
}

/// Scale a daily standard deviation to annualized percentage points
pub fn annualize(daily_std: f64, periods_per_year: f64) -> f64 {
    daily_std * periods_per_year.sqrt() * 100.0
}

/// Realized volatility over the last `window` returns
pub fn realized_vol(closes: &[f64], window: usize, periods_per_year: f64) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }
    let returns = log_returns(&closes[closes.len() - window - 1..]);
    sample_std(&returns).map(|s| annualize(s, periods_per_year))
}

/// Realized volatility evaluated at every bar that has a full window behind it
pub fn rolling_realized_vol(closes: &[f64], window: usize, periods_per_year: f64) -> Vec<f64> {
    if window < 2 || closes.len() < window + 1 {
        return Vec::new();
    }
    (window + 1..=closes.len())
        .filter_map(|end| realized_vol(&closes[..end], window, periods_per_year))
        .collect()
}

/// Parkinson range estimator over (high, low) pairs.
///
/// Pairs with no range are expected to be filtered out by the caller.
pub fn parkinson_vol(ranges: &[(f64, f64)], periods_per_year: f64) -> Option<f64> {
    if ranges.is_empty() {
        return None;
    }
    let mean_sq = ranges
        .iter()
        .map(|(high, low)| (high / low).ln().powi(2))
        .mean();
    let daily = (mean_sq / (4.0 * std::f64::consts::LN_2)).sqrt();
    daily.is_finite().then(|| annualize(daily, periods_per_year))
}

/// RiskMetrics EWMA variance, returning the one-step-ahead daily variance
pub fn ewma_variance(returns: &[f64], decay: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let seed = returns.iter().map(|r| r * r).mean();
    let variance = returns
        .iter()
        .fold(seed, |var, r| decay * var + (1.0 - decay) * r * r);
    variance.is_finite().then_some(variance)
}

/// GARCH(1,1) one-step-ahead daily variance.
///
/// Without an explicit omega the long-run variance is pinned to the sample
/// variance of `returns` (variance targeting). The recursion starts at that
/// long-run level.
pub fn garch_variance(returns: &[f64], params: &GarchParams) -> Option<f64> {
    let persistence = params.alpha + params.beta;
    if returns.len() < 2 || persistence >= 1.0 {
        return None;
    }
    let sample_var = returns.iter().variance();
    if !sample_var.is_finite() {
        return None;
    }
    let omega = params.omega.unwrap_or(sample_var * (1.0 - persistence));
    let long_run = omega / (1.0 - persistence);

    let variance = returns.iter().fold(long_run, |var, r| {
        omega + params.alpha * r * r + params.beta * var
    });
    (variance.is_finite() && variance >= 0.0).then_some(variance)
}

/// Percentage of `history` strictly below `value`
pub fn percentile_rank(history: &[f64], value: f64) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let below = history.iter().filter(|&&h| h < value).count();
    Some(below as f64 / history.len() as f64 * 100.0)
}

/// Position of `value` between the history's min and max, 0-100
pub fn range_rank(history: &[f64], value: f64) -> Option<f64> {
    let (min, max) = history.iter().copied().minmax().into_option()?;
    if max <= min {
        return Some(50.0);
    }
    Some(((value - min) / (max - min) * 100.0).clamp(0.0, 100.0))
}
