//! Strike placement helpers
//!
//! Strikes are always derived from the current spot and a volatility level;
//! the listed chain only decides spacing and which nearby strikes are liquid.

use itertools::Itertools;
use ordered_float::OrderedFloat;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

use crate::types::{OptionKind, OptionQuote};

/// Expected one-standard-deviation move to expiry.
///
/// `vol_pct` is annualized percentage points.
pub fn expected_move(spot: f64, vol_pct: f64, days_to_expiry: i64) -> f64 {
    let t = days_to_expiry.max(1) as f64 / 365.0;
    spot * (vol_pct / 100.0) * t.sqrt()
}

/// Wider wings when implied volatility is rich, tighter when cheap
pub fn wing_factor(iv_percentile: f64) -> f64 {
    if iv_percentile > 80.0 {
        1.4
    } else if iv_percentile > 50.0 {
        1.1
    } else if iv_percentile < 20.0 {
        0.8
    } else {
        1.0
    }
}

pub fn round_to(value: f64, interval: f64) -> f64 {
    (value / interval).round() * interval
}

/// Strike whose zero-rate Black-Scholes delta has magnitude `delta`
pub fn delta_strike(spot: f64, vol_pct: f64, days_to_expiry: i64, delta: f64, kind: OptionKind) -> Option<f64> {
    let normal = Normal::new(0.0, 1.0).ok()?;
    let sigma = vol_pct / 100.0;
    let t = days_to_expiry.max(1) as f64 / 365.0;
    let sd = sigma * t.sqrt();
    if !(sd > 0.0) || !(0.0 < delta && delta < 1.0) {
        return None;
    }

    let d1 = match kind {
        OptionKind::Call => normal.inverse_cdf(delta),
        OptionKind::Put => normal.inverse_cdf(1.0 - delta),
    };
    let strike = spot * (-d1 * sd + 0.5 * sd * sd).exp();
    strike.is_finite().then_some(strike)
}

/// Listed strikes of the front expiry with their spacing
#[derive(Debug, Clone)]
pub struct StrikeGrid {
    pub interval: f64,
    min_oi: f64,
    open_interest: BTreeMap<(OptionKind, OrderedFloat<f64>), f64>,
}

impl StrikeGrid {
    pub fn from_chain(chain: &[&OptionQuote], default_interval: f64, min_oi: f64) -> Self {
        let mut open_interest = BTreeMap::new();
        for quote in chain {
            *open_interest
                .entry((quote.kind, OrderedFloat(quote.strike)))
                .or_insert(0.0) += quote.open_interest;
        }

        StrikeGrid {
            interval: strike_interval(chain).unwrap_or(default_interval),
            min_oi,
            open_interest,
        }
    }

    /// Round to the grid, then prefer a liquid listed strike within one interval
    pub fn snap(&self, target: f64, kind: OptionKind) -> f64 {
        let rounded = round_to(target, self.interval);
        self.open_interest
            .iter()
            .filter(|((k, _), oi)| *k == kind && **oi >= self.min_oi)
            .map(|((_, strike), _)| strike.0)
            .filter(|strike| (strike - rounded).abs() <= self.interval + 1e-9)
            .min_by_key(|strike| OrderedFloat((strike - rounded).abs()))
            .unwrap_or(rounded)
    }

    /// One strike for both short legs: the nearest strike within one interval
    /// that is liquid on calls and puts alike, else the rounded target
    pub fn snap_shared(&self, target: f64) -> f64 {
        let rounded = round_to(target, self.interval);
        let liquid = |kind: OptionKind, strike: OrderedFloat<f64>| {
            self.open_interest
                .get(&(kind, strike))
                .is_some_and(|oi| *oi >= self.min_oi)
        };
        self.open_interest
            .keys()
            .filter(|(kind, _)| *kind == OptionKind::Call)
            .map(|(_, strike)| *strike)
            .filter(|strike| liquid(OptionKind::Call, *strike) && liquid(OptionKind::Put, *strike))
            .map(|strike| strike.0)
            .filter(|strike| (strike - rounded).abs() <= self.interval + 1e-9)
            .min_by_key(|strike| OrderedFloat((strike - rounded).abs()))
            .unwrap_or(rounded)
    }
}

/// Most common spacing between adjacent listed strikes, smallest on ties
pub fn strike_interval(chain: &[&OptionQuote]) -> Option<f64> {
    let mut counts: BTreeMap<OrderedFloat<f64>, usize> = BTreeMap::new();
    chain
        .iter()
        .map(|q| OrderedFloat(q.strike))
        .sorted()
        .dedup()
        .tuple_windows()
        .map(|(a, b)| OrderedFloat(b.0 - a.0))
        .filter(|d| d.0 > 0.0)
        .for_each(|d| *counts.entry(d).or_insert(0) += 1);

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(diff, _)| diff.0)
}
