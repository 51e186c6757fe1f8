//! Estimator weights and the dynamic weighting policy

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analytics::{Estimator, PerformanceHistory};
use crate::config::RegimeConfig;
use crate::error::{EngineError, EngineResult};

const SKILL_EPSILON: f64 = 1e-3;

/// A complete, normalized weight vector over every [`Estimator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(BTreeMap<Estimator, f64>);

impl Weights {
    /// Validate that every estimator has a finite, non-negative weight and the sum is 1
    pub fn from_map(map: BTreeMap<Estimator, f64>, tolerance: f64) -> EngineResult<Self> {
        let weights = Weights(map);
        weights.validate(tolerance)?;
        Ok(weights)
    }

    pub fn validate(&self, tolerance: f64) -> EngineResult<()> {
        for estimator in Estimator::ALL {
            match self.0.get(&estimator) {
                None => {
                    return Err(EngineError::InvalidWeightConfig(format!(
                        "no weight for {}",
                        estimator
                    )))
                }
                Some(w) if !w.is_finite() || *w < 0.0 => {
                    return Err(EngineError::InvalidWeightConfig(format!(
                        "weight for {} must be finite and non-negative, got {}",
                        estimator, w
                    )))
                }
                Some(_) => {}
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > tolerance {
            return Err(EngineError::InvalidWeightConfig(format!(
                "weights sum to {:.6}, expected 1 within {}",
                sum, tolerance
            )));
        }
        Ok(())
    }

    pub fn get(&self, estimator: Estimator) -> f64 {
        self.0.get(&estimator).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Estimator, f64)> + '_ {
        self.0.iter().map(|(e, w)| (*e, *w))
    }
}

/// Pure mapping from (prior weights, recent estimator skill) to the weights for this run.
///
/// Forecasting estimators with a performance record share their combined
/// prior mass in proportion to `1 / (mean abs error + eps)`; the result is
/// blended with the prior by `adaptation_rate` and then projected into
/// `[floor, ceiling]` by water-filling, which keeps the unit sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightPolicy {
    pub floor: f64,
    pub ceiling: f64,
    pub adaptation_rate: f64,
    pub tolerance: f64,
}

impl WeightPolicy {
    pub fn from_config(config: &RegimeConfig) -> Self {
        WeightPolicy {
            floor: config.weight_floor,
            ceiling: config.weight_ceiling,
            adaptation_rate: config.adaptation_rate,
            tolerance: config.weight_tolerance,
        }
    }

    pub fn adjust(&self, prior: &Weights, history: &PerformanceHistory) -> EngineResult<Weights> {
        prior.validate(self.tolerance)?;

        let n = Estimator::ALL.len() as f64;
        if self.floor * n > 1.0 + self.tolerance || self.ceiling * n < 1.0 - self.tolerance {
            return Err(EngineError::InvalidWeightConfig(format!(
                "floor {} / ceiling {} infeasible for {} estimators",
                self.floor, self.ceiling, n
            )));
        }

        let skills: BTreeMap<Estimator, f64> = Estimator::ALL
            .iter()
            .filter(|e| e.is_forecaster())
            .filter_map(|e| {
                history
                    .mean_abs_error(*e)
                    .map(|mae| (*e, 1.0 / (mae + SKILL_EPSILON)))
            })
            .collect();

        let tracked_mass: f64 = skills.keys().map(|e| prior.get(*e)).sum();
        let total_skill: f64 = skills.values().sum();

        let blended: BTreeMap<Estimator, f64> = Estimator::ALL
            .iter()
            .map(|e| {
                let p = prior.get(*e);
                let target = match skills.get(e) {
                    Some(skill) if total_skill > 0.0 => tracked_mass * skill / total_skill,
                    _ => p,
                };
                (*e, (1.0 - self.adaptation_rate) * p + self.adaptation_rate * target)
            })
            .collect();

        let projected = water_fill(&blended, self.floor, self.ceiling);
        Weights::from_map(projected, self.tolerance)
    }
}

/// Project onto {floor <= w <= ceiling, sum w = 1} by a common additive level.
///
/// The clamped sum is monotone in the level, so bisection finds it.
fn water_fill(
    weights: &BTreeMap<Estimator, f64>,
    floor: f64,
    ceiling: f64,
) -> BTreeMap<Estimator, f64> {
    let filled = |level: f64| -> f64 {
        weights
            .values()
            .map(|w| (w + level).clamp(floor, ceiling))
            .sum()
    };

    let (mut lo, mut hi) = (-1.0, 1.0);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if filled(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let level = 0.5 * (lo + hi);

    weights
        .iter()
        .map(|(e, w)| (*e, (w + level).clamp(floor, ceiling)))
        .collect()
}
