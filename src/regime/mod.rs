//! Regime classification
//!
//! Composite volatility score, its ordered regime bands and the dynamic
//! estimator weighting that produces it.

pub mod scorer;
pub mod weights;

pub use scorer::{RegimeScore, RegimeScorer};
pub use weights::{WeightPolicy, Weights};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered, closed set of volatility regimes, calmest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegimeLabel {
    Low,
    Normal,
    Elevated,
    High,
    EventDriven,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 5] = [
        RegimeLabel::Low,
        RegimeLabel::Normal,
        RegimeLabel::Elevated,
        RegimeLabel::High,
        RegimeLabel::EventDriven,
    ];
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeLabel::Low => write!(f, "Low"),
            RegimeLabel::Normal => write!(f, "Normal"),
            RegimeLabel::Elevated => write!(f, "Elevated"),
            RegimeLabel::High => write!(f, "High"),
            RegimeLabel::EventDriven => write!(f, "EventDriven"),
        }
    }
}

/// Band boundaries on the [0, 100] composite scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeBands {
    boundaries: [f64; 4],
}

impl RegimeBands {
    pub fn new(boundaries: [f64; 4]) -> Self {
        RegimeBands { boundaries }
    }

    /// A score equal to a boundary belongs to the higher band
    pub fn label(&self, score: f64) -> RegimeLabel {
        let index = self.boundaries.iter().filter(|b| **b <= score).count();
        RegimeLabel::ALL[index]
    }

    /// Distance to the nearest interior boundary relative to the band's half
    /// width (full width for the two outer bands), in [0, 1]
    pub fn confidence(&self, score: f64) -> f64 {
        let b = self.boundaries;
        let index = b.iter().filter(|x| **x <= score).count();
        let raw = match index {
            0 => (b[0] - score) / b[0],
            4 => (score - b[3]) / (100.0 - b[3]),
            i => {
                let (lower, upper) = (b[i - 1], b[i]);
                (score - lower).min(upper - score) / ((upper - lower) / 2.0)
            }
        };
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
