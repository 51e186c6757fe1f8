use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{RegimeBands, RegimeLabel, WeightPolicy, Weights};
use crate::analytics::{Estimator, PerformanceHistory, VolatilityMetrics};
use crate::config::RegimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::participant::ParticipantFlow;

const DRIVER_HIGH: f64 = 75.0;
const DRIVER_LOW: f64 = 25.0;

/// Composite regime score with its full breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeScore {
    /// In [0, 100]
    pub composite: f64,
    pub label: RegimeLabel,
    pub confidence: f64,
    pub sub_scores: BTreeMap<Estimator, f64>,
    /// Weight times sub-score; sums to the unclamped composite
    pub contributions: BTreeMap<Estimator, f64>,
    pub weights: Weights,
    pub drivers: Vec<String>,
}

pub struct RegimeScorer<'a> {
    config: &'a RegimeConfig,
}

impl<'a> RegimeScorer<'a> {
    pub fn new(config: &'a RegimeConfig) -> Self {
        RegimeScorer { config }
    }

    /// Prior weights from configuration
    pub fn base_weights(&self) -> EngineResult<Weights> {
        Weights::from_map(self.config.base_weights.clone(), self.config.weight_tolerance)
    }

    /// Weights for this run, derived from the prior and the snapshot's own skill record
    pub fn dynamic_weights(&self, history: &PerformanceHistory) -> EngineResult<Weights> {
        WeightPolicy::from_config(self.config).adjust(&self.base_weights()?, history)
    }

    pub fn sub_score(&self, estimator: Estimator, raw: f64) -> EngineResult<f64> {
        let range = self.config.reference_ranges.get(&estimator).ok_or_else(|| {
            EngineError::InvalidConfig(format!("missing reference range for {}", estimator))
        })?;
        Ok(range.normalize(raw))
    }

    pub fn score(
        &self,
        metrics: &VolatilityMetrics,
        flow: &ParticipantFlow,
        weights: &Weights,
    ) -> EngineResult<RegimeScore> {
        weights.validate(self.config.weight_tolerance)?;

        let mut sub_scores = BTreeMap::new();
        let mut contributions = BTreeMap::new();
        let mut drivers = Vec::new();

        for estimator in Estimator::ALL {
            let raw = metrics
                .value(estimator)
                .unwrap_or_else(|| flow.pressure());
            let sub = self.sub_score(estimator, raw)?;

            if sub >= DRIVER_HIGH {
                drivers.push(format!("{} elevated ({:.2})", estimator, raw));
            } else if sub <= DRIVER_LOW {
                drivers.push(format!("{} subdued ({:.2})", estimator, raw));
            }

            sub_scores.insert(estimator, sub);
            contributions.insert(estimator, weights.get(estimator) * sub);
        }

        let composite = contributions.values().sum::<f64>().clamp(0.0, 100.0);
        let bands = RegimeBands::new(self.config.band_boundaries);
        let label = bands.label(composite);
        let confidence = bands.confidence(composite);

        debug!(composite, regime = %label, confidence, "regime scored");

        Ok(RegimeScore {
            composite,
            label,
            confidence,
            sub_scores,
            contributions,
            weights: weights.clone(),
            drivers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::ConditionalModel;
    use approx::assert_relative_eq;

    fn metrics(rv: f64, garch: f64, ivp: f64) -> VolatilityMetrics {
        VolatilityMetrics {
            realized_vol: rv,
            parkinson_vol: rv,
            conditional_vol: garch,
            conditional_model: ConditionalModel::Garch,
            vol_of_vol: 0.5,
            atm_iv: rv + 1.0,
            iv_percentile: ivp,
            iv_rank: ivp,
            iv_rv_spread: 1.0,
            iv_momentum: 0.0,
        }
    }

    #[test]
    fn test_calm_market_scores_low() {
        let config = RegimeConfig::default();
        let scorer = RegimeScorer::new(&config);
        let weights = scorer.base_weights().unwrap();
        let score = scorer
            .score(&metrics(12.0, 14.0, 20.0), &ParticipantFlow::neutral(1.0), &weights)
            .unwrap();

        assert!(score.label <= RegimeLabel::Normal);
        assert!((0.0..=100.0).contains(&score.composite));
        assert_relative_eq!(
            score.contributions.values().sum::<f64>(),
            score.composite,
            epsilon = 1e-9
        );
        assert!(!score.drivers.is_empty());
    }

    #[test]
    fn test_stressed_market_scores_high() {
        let config = RegimeConfig::default();
        let scorer = RegimeScorer::new(&config);
        let weights = scorer.base_weights().unwrap();
        let mut stressed = metrics(45.0, 50.0, 100.0);
        stressed.vol_of_vol = 10.0;
        stressed.iv_rv_spread = 20.0;
        let mut flow = ParticipantFlow::neutral(1.0);
        flow.bias = -1.0;

        let score = scorer.score(&stressed, &flow, &weights).unwrap();
        assert_relative_eq!(score.composite, 100.0, epsilon = 1e-9);
        assert_eq!(score.label, RegimeLabel::EventDriven);
    }

    #[test]
    fn test_invalid_weights_fail_the_score() {
        let config = RegimeConfig::default();
        let scorer = RegimeScorer::new(&config);
        let mut map = config.base_weights.clone();
        map.insert(Estimator::RealizedVol, 0.9);
        let err = Weights::from_map(map, 1e-6).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWeightConfig(_)));
        assert!(scorer.dynamic_weights(&PerformanceHistory::default()).is_ok());
    }

    #[test]
    fn test_composite_bounded_for_extreme_inputs() {
        let config = RegimeConfig::default();
        let scorer = RegimeScorer::new(&config);
        let weights = scorer.base_weights().unwrap();
        for (rv, ivp) in [(0.0, 0.0), (1e6, 100.0), (-5.0, 50.0)] {
            let score = scorer
                .score(&metrics(rv, rv, ivp), &ParticipantFlow::neutral(1.0), &weights)
                .unwrap();
            assert!((0.0..=100.0).contains(&score.composite));
        }
    }
}
