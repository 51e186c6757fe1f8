//! Institutional participant flow
//!
//! Combines foreign and domestic net position changes over a lookback into a
//! single bounded directional bias.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ParticipantConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::FlowObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowDirection::Bullish => write!(f, "Bullish"),
            FlowDirection::Bearish => write!(f, "Bearish"),
            FlowDirection::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Net institutional positioning over the lookback.
///
/// `bias` is signed and never exceeds the configured cap in magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantFlow {
    pub foreign_net: f64,
    pub domestic_net: f64,
    pub observations: usize,
    pub bias: f64,
    pub cap: f64,
    pub direction: FlowDirection,
    pub context: String,
}

impl ParticipantFlow {
    /// Flow with no directional content
    pub fn neutral(cap: f64) -> Self {
        ParticipantFlow {
            foreign_net: 0.0,
            domestic_net: 0.0,
            observations: 0,
            bias: 0.0,
            cap,
            direction: FlowDirection::Neutral,
            context: "Foreign Neutral".to_string(),
        }
    }

    /// Unsigned bias as a fraction of the cap, in [0, 1]
    pub fn pressure(&self) -> f64 {
        if self.cap <= 0.0 {
            return 0.0;
        }
        (self.bias.abs() / self.cap).clamp(0.0, 1.0)
    }
}

pub struct ParticipantFlowAnalyzer<'a> {
    config: &'a ParticipantConfig,
}

impl<'a> ParticipantFlowAnalyzer<'a> {
    pub fn new(config: &'a ParticipantConfig) -> Self {
        ParticipantFlowAnalyzer { config }
    }

    pub fn analyze(&self, observations: &[FlowObservation]) -> EngineResult<ParticipantFlow> {
        let cfg = self.config;

        let mut ordered: Vec<&FlowObservation> = observations.iter().collect();
        ordered.sort_by_key(|o| o.date);
        let window = &ordered[ordered.len().saturating_sub(cfg.lookback)..];

        if window.len() < cfg.min_observations {
            return Err(EngineError::insufficient(
                "participant_flow",
                cfg.min_observations,
                window.len(),
            ));
        }

        let foreign_net: f64 = window.iter().map(|o| o.foreign.unwrap_or(0.0)).sum();
        let domestic_net: f64 = window.iter().map(|o| o.domestic.unwrap_or(0.0)).sum();

        let weighted = cfg.foreign_weight * foreign_net + cfg.domestic_weight * domestic_net;
        let bias = (weighted / cfg.scale).clamp(-cfg.cap, cfg.cap);

        let direction = if bias >= cfg.directional_threshold {
            FlowDirection::Bullish
        } else if bias <= -cfg.directional_threshold {
            FlowDirection::Bearish
        } else {
            FlowDirection::Neutral
        };

        Ok(ParticipantFlow {
            foreign_net,
            domestic_net,
            observations: window.len(),
            bias,
            cap: cfg.cap,
            direction,
            context: self.context(foreign_net),
        })
    }

    fn context(&self, foreign_net: f64) -> String {
        let cfg = self.config;
        let label = if foreign_net > cfg.foreign_strong_contracts {
            "Foreign Strong Long"
        } else if foreign_net < -cfg.foreign_strong_contracts {
            "Foreign Strong Short"
        } else if foreign_net.abs() > cfg.foreign_moderate_contracts {
            "Foreign Moderate Position"
        } else {
            "Foreign Neutral"
        };
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn obs(day: u32, foreign: Option<f64>, domestic: Option<f64>) -> FlowObservation {
        FlowObservation {
            date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            foreign,
            domestic,
        }
    }

    #[test]
    fn test_weighted_bias() {
        let config = ParticipantConfig::default();
        let flow = ParticipantFlowAnalyzer::new(&config)
            .analyze(&[obs(1, Some(20_000.0), Some(10_000.0))])
            .unwrap();
        // (0.7 * 20000 + 0.3 * 10000) / 100000
        assert_relative_eq!(flow.bias, 0.17, epsilon = 1e-12);
        assert_eq!(flow.direction, FlowDirection::Neutral);
        assert_eq!(flow.context, "Foreign Neutral");
    }

    #[test]
    fn test_bias_is_clipped_to_cap() {
        let config = ParticipantConfig::default();
        let flow = ParticipantFlowAnalyzer::new(&config)
            .analyze(&[obs(1, Some(-900_000.0), Some(0.0))])
            .unwrap();
        assert_eq!(flow.bias, -config.cap);
        assert_eq!(flow.direction, FlowDirection::Bearish);
        assert_eq!(flow.context, "Foreign Strong Short");
        assert_eq!(flow.pressure(), 1.0);
    }

    #[test]
    fn test_missing_categories_count_as_zero() {
        let config = ParticipantConfig::default();
        let flow = ParticipantFlowAnalyzer::new(&config)
            .analyze(&[obs(1, None, Some(100_000.0)), obs(2, Some(40_000.0), None)])
            .unwrap();
        assert_eq!(flow.foreign_net, 40_000.0);
        assert_eq!(flow.domestic_net, 100_000.0);
        assert_relative_eq!(flow.bias, 0.58, epsilon = 1e-12);
        assert_eq!(flow.direction, FlowDirection::Bullish);
        assert_eq!(flow.context, "Foreign Moderate Position");
    }

    #[test]
    fn test_lookback_keeps_most_recent() {
        let config = ParticipantConfig {
            lookback: 2,
            ..ParticipantConfig::default()
        };
        let flow = ParticipantFlowAnalyzer::new(&config)
            .analyze(&[
                obs(3, Some(1.0), None),
                obs(1, Some(1_000_000.0), None),
                obs(2, Some(2.0), None),
            ])
            .unwrap();
        assert_eq!(flow.observations, 2);
        assert_eq!(flow.foreign_net, 3.0);
    }

    #[test]
    fn test_too_few_observations() {
        let config = ParticipantConfig {
            min_observations: 3,
            ..ParticipantConfig::default()
        };
        let err = ParticipantFlowAnalyzer::new(&config)
            .analyze(&[obs(1, Some(1.0), None)])
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                required: 3,
                available: 1,
                ..
            }
        ));
    }
}
