//! Configuration management
//!
//! Every threshold the core uses lives here: estimator windows, band
//! boundaries, weight floors and ceilings, veto windows and size caps.
//! Loaded from a JSON file; every section falls back to the production
//! defaults when omitted. A handful of operational values can be overridden
//! from the environment (or a `.env` file).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::analytics::Estimator;
use crate::error::{EngineError, EngineResult};
use crate::regime::Weights;
use crate::strategies::StrategyConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub participant: ParticipantConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Overrides: VG_BASE_CAPITAL, VG_MAX_LOSS_PER_TRADE, VG_DB_PATH, VG_DATA_DIR
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(capital) = std::env::var("VG_BASE_CAPITAL") {
            self.strategy.base_capital = capital
                .parse::<Decimal>()
                .context("VG_BASE_CAPITAL is not a number")?;
        }
        if let Ok(max_loss) = std::env::var("VG_MAX_LOSS_PER_TRADE") {
            self.strategy.max_loss_per_trade = max_loss
                .parse::<Decimal>()
                .context("VG_MAX_LOSS_PER_TRADE is not a number")?;
        }
        if let Ok(db_path) = std::env::var("VG_DB_PATH") {
            self.engine.state_db = db_path;
        }
        if let Ok(data_dir) = std::env::var("VG_DATA_DIR") {
            self.engine.data_dir = data_dir;
        }
        Ok(())
    }

    /// Reject configurations the core must never silently correct
    pub fn validate(&self) -> EngineResult<()> {
        self.analytics.validate()?;
        self.participant.validate()?;
        self.calendar.validate()?;
        self.regime.validate()?;
        self.strategy.validate()?;
        Ok(())
    }

    /// Stable short hash of the effective configuration, stored with each analysis
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(&Sha256::digest(&bytes)[..8])
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

/// GARCH(1,1) parameters on daily log returns.
///
/// `omega` absent means variance targeting against the sample variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omega: Option<f64>,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for GarchParams {
    fn default() -> Self {
        GarchParams {
            omega: None,
            alpha: 0.08,
            beta: 0.90,
        }
    }
}

/// Volatility analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Annualization factor for daily bars
    pub periods_per_year: f64,
    /// Returns used by the realized volatility estimator
    pub realized_window: usize,
    /// Bars considered by the range-based estimator
    pub parkinson_window: usize,
    /// Minimum bars with a non-zero range inside that window
    pub parkinson_min_bars: usize,
    /// Rolling realized-vol observations used for vol-of-vol
    pub vov_window: usize,
    /// None falls back to EWMA
    pub garch: Option<GarchParams>,
    pub garch_min_returns: usize,
    /// EWMA decay used when GARCH parameters are unavailable
    pub ewma_decay: f64,
    pub iv_history_min: usize,
    pub momentum_lookback: usize,
    /// Bars between forecast-skill anchors
    pub skill_horizon: usize,
    pub skill_anchors: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            periods_per_year: 252.0,
            realized_window: 20,
            parkinson_window: 20,
            parkinson_min_bars: 10,
            vov_window: 5,
            garch: Some(GarchParams::default()),
            garch_min_returns: 20,
            ewma_decay: 0.94,
            iv_history_min: 20,
            momentum_lookback: 5,
            skill_horizon: 5,
            skill_anchors: 4,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.periods_per_year <= 0.0 {
            return Err(invalid("periods_per_year must be positive"));
        }
        if self.realized_window < 2 || self.vov_window < 2 {
            return Err(invalid("realized_window and vov_window must be at least 2"));
        }
        if self.parkinson_window == 0 || self.parkinson_min_bars == 0 {
            return Err(invalid("parkinson_window and parkinson_min_bars must be positive"));
        }
        if self.parkinson_min_bars > self.parkinson_window {
            return Err(invalid("parkinson_min_bars cannot exceed parkinson_window"));
        }
        if let Some(g) = self.garch {
            if g.alpha < 0.0 || g.beta < 0.0 {
                return Err(invalid("GARCH alpha and beta must be non-negative"));
            }
            if g.alpha + g.beta >= 1.0 {
                return Err(invalid(format!(
                    "GARCH alpha + beta must be < 1 (got {:.4})",
                    g.alpha + g.beta
                )));
            }
            if matches!(g.omega, Some(w) if w <= 0.0) {
                return Err(invalid("GARCH omega must be positive"));
            }
        }
        if !(0.0..1.0).contains(&self.ewma_decay) || self.ewma_decay == 0.0 {
            return Err(invalid("ewma_decay must be in (0, 1)"));
        }
        if self.skill_horizon < 2 {
            return Err(invalid("skill_horizon must be at least 2"));
        }
        Ok(())
    }
}

/// Participant flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Most recent observations summed into the flow
    pub lookback: usize,
    pub min_observations: usize,
    pub foreign_weight: f64,
    pub domestic_weight: f64,
    /// Contracts corresponding to a bias of 1.0
    pub scale: f64,
    /// Bias magnitude is clipped here
    pub cap: f64,
    pub directional_threshold: f64,
    /// Foreign net contracts labelled a strong position
    pub foreign_strong_contracts: f64,
    pub foreign_moderate_contracts: f64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        ParticipantConfig {
            lookback: 5,
            min_observations: 1,
            foreign_weight: 0.7,
            domestic_weight: 0.3,
            scale: 100_000.0,
            cap: 1.0,
            directional_threshold: 0.2,
            foreign_strong_contracts: 50_000.0,
            foreign_moderate_contracts: 20_000.0,
        }
    }
}

impl ParticipantConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.lookback == 0 || self.min_observations == 0 {
            return Err(invalid("participant lookback and min_observations must be positive"));
        }
        if self.foreign_weight < 0.0 || self.domestic_weight < 0.0 {
            return Err(invalid("participant weights must be non-negative"));
        }
        if self.foreign_weight + self.domestic_weight <= 0.0 {
            return Err(invalid("participant weights cannot both be zero"));
        }
        if self.scale <= 0.0 || self.cap <= 0.0 {
            return Err(invalid("participant scale and cap must be positive"));
        }
        Ok(())
    }
}

/// Hours before and after an event during which new entries are vetoed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VetoWindow {
    pub blackout_hours: f64,
    pub cooldown_hours: f64,
}

impl VetoWindow {
    pub fn new(blackout_hours: f64, cooldown_hours: f64) -> Self {
        VetoWindow {
            blackout_hours,
            cooldown_hours,
        }
    }
}

/// Economic calendar gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Market-local offset from UTC (IST = 330)
    pub utc_offset_minutes: i32,
    /// Veto the whole local day of a high-impact event
    pub same_day_blackout: bool,
    pub central_bank: VetoWindow,
    pub macro_release: VetoWindow,
    pub expiry: VetoWindow,
    pub square_off_horizon_hours: f64,
    pub square_off_lead_hours: f64,
    /// Local hour of the previous-day square-off
    pub square_off_hour: u32,
    pub veto_keywords: Vec<String>,
    pub high_impact_keywords: Vec<String>,
    pub medium_impact_keywords: Vec<String>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        CalendarConfig {
            utc_offset_minutes: 330,
            same_day_blackout: true,
            central_bank: VetoWindow::new(24.0, 6.0),
            macro_release: VetoWindow::new(12.0, 2.0),
            expiry: VetoWindow::new(0.0, 0.0),
            square_off_horizon_hours: 48.0,
            square_off_lead_hours: 2.0,
            square_off_hour: 14,
            veto_keywords: strings(&[
                "RBI Monetary Policy",
                "RBI Policy",
                "Reserve Bank of India",
                "Repo Rate Decision",
                "MPC Meeting",
                "FOMC",
                "Federal Reserve Meeting",
                "Fed Meeting",
                "Federal Funds Rate Decision",
            ]),
            high_impact_keywords: strings(&[
                "GDP",
                "Gross Domestic Product",
                "NFP",
                "Non-Farm Payroll",
                "CPI",
                "Consumer Price Index",
                "Union Budget",
                "Budget Speech",
            ]),
            medium_impact_keywords: strings(&[
                "PMI",
                "Industrial Production",
                "Retail Sales",
            ]),
        }
    }
}

/// Longest window accepted for any calendar duration, one leap year
pub const MAX_WINDOW_HOURS: f64 = 24.0 * 366.0;

fn window_hours_valid(h: f64) -> bool {
    (0.0..=MAX_WINDOW_HOURS).contains(&h)
}

impl CalendarConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for (name, w) in [
            ("central_bank", self.central_bank),
            ("macro_release", self.macro_release),
            ("expiry", self.expiry),
        ] {
            if !window_hours_valid(w.blackout_hours) || !window_hours_valid(w.cooldown_hours) {
                return Err(invalid(format!(
                    "{} veto window must be between 0 and {} hours",
                    name, MAX_WINDOW_HOURS
                )));
            }
        }
        if !window_hours_valid(self.square_off_horizon_hours)
            || !window_hours_valid(self.square_off_lead_hours)
        {
            return Err(invalid(format!(
                "square-off hours must be between 0 and {}",
                MAX_WINDOW_HOURS
            )));
        }
        if self.square_off_hour > 23 {
            return Err(invalid("square_off_hour must be 0-23"));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid("utc_offset_minutes out of range"));
        }
        Ok(())
    }
}

/// Linear map of an estimator value onto the common [0, 100] sub-score scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: f64,
    pub high: f64,
}

impl ReferenceRange {
    pub fn new(low: f64, high: f64) -> Self {
        ReferenceRange { low, high }
    }

    pub fn normalize(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        ((value - self.low) / (self.high - self.low) * 100.0).clamp(0.0, 100.0)
    }
}

/// Regime scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub reference_ranges: BTreeMap<Estimator, ReferenceRange>,
    /// Prior weights, must sum to 1
    pub base_weights: BTreeMap<Estimator, f64>,
    pub weight_floor: f64,
    pub weight_ceiling: f64,
    /// Blend between prior weights (0) and skill-implied weights (1)
    pub adaptation_rate: f64,
    pub weight_tolerance: f64,
    /// Ascending boundaries between Low | Normal | Elevated | High | EventDriven
    pub band_boundaries: [f64; 4],
}

impl Default for RegimeConfig {
    fn default() -> Self {
        let reference_ranges = BTreeMap::from([
            (Estimator::RealizedVol, ReferenceRange::new(8.0, 40.0)),
            (Estimator::ParkinsonVol, ReferenceRange::new(8.0, 40.0)),
            (Estimator::ConditionalVol, ReferenceRange::new(8.0, 40.0)),
            (Estimator::VolOfVol, ReferenceRange::new(0.0, 8.0)),
            (Estimator::IvPercentile, ReferenceRange::new(0.0, 100.0)),
            (Estimator::IvRvSpread, ReferenceRange::new(-5.0, 15.0)),
            (Estimator::FlowPressure, ReferenceRange::new(0.0, 1.0)),
        ]);
        let base_weights = BTreeMap::from([
            (Estimator::RealizedVol, 0.15),
            (Estimator::ParkinsonVol, 0.10),
            (Estimator::ConditionalVol, 0.20),
            (Estimator::VolOfVol, 0.10),
            (Estimator::IvPercentile, 0.25),
            (Estimator::IvRvSpread, 0.10),
            (Estimator::FlowPressure, 0.10),
        ]);
        RegimeConfig {
            reference_ranges,
            base_weights,
            weight_floor: 0.05,
            weight_ceiling: 0.40,
            adaptation_rate: 0.5,
            weight_tolerance: 1e-6,
            band_boundaries: [25.0, 45.0, 65.0, 85.0],
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for estimator in Estimator::ALL {
            let range = self.reference_ranges.get(&estimator).ok_or_else(|| {
                invalid(format!("missing reference range for {}", estimator))
            })?;
            if range.high <= range.low {
                return Err(invalid(format!("empty reference range for {}", estimator)));
            }
        }

        if !(0.0..=1.0).contains(&self.adaptation_rate) {
            return Err(invalid("adaptation_rate must be in [0, 1]"));
        }

        let n = Estimator::ALL.len() as f64;
        if self.weight_floor < 0.0
            || self.weight_ceiling > 1.0
            || self.weight_floor > self.weight_ceiling
            || self.weight_floor * n > 1.0 + self.weight_tolerance
            || self.weight_ceiling * n < 1.0 - self.weight_tolerance
        {
            return Err(EngineError::InvalidWeightConfig(format!(
                "floor {} / ceiling {} cannot hold {} weights summing to 1",
                self.weight_floor, self.weight_ceiling, n
            )));
        }

        Weights::from_map(self.base_weights.clone(), self.weight_tolerance)?;

        let b = self.band_boundaries;
        let ascending = b.windows(2).all(|w| w[0] < w[1]);
        if !ascending || b[0] <= 0.0 || b[3] >= 100.0 {
            return Err(invalid(
                "band boundaries must be strictly ascending inside (0, 100)",
            ));
        }
        Ok(())
    }
}

/// Runtime configuration for the analysis loop and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub underlying: String,
    pub analysis_interval_secs: u64,
    pub broadcast_interval_secs: u64,
    pub run_timeout_secs: u64,
    pub data_dir: String,
    pub state_db: String,
    pub calendar_days_ahead: i64,
    pub calendar_countries: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            underlying: "NIFTY".to_string(),
            analysis_interval_secs: 1800,
            broadcast_interval_secs: 5,
            run_timeout_secs: 300,
            data_dir: "data".to_string(),
            state_db: "data/volguard.db".to_string(),
            calendar_days_ahead: 7,
            calendar_countries: vec!["IN".to_string(), "US".to_string()],
        }
    }
}
