//! Analysis pipeline and run coordination
//!
//! [`analyze`] is the pure pipeline: analytics, performance history, flow and
//! calendar gate run side by side on the immutable inputs, then scoring and
//! selection follow. [`AnalysisEngine`] wraps it with the collaborators, the
//! single-run guard and the latest-result channel.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::analytics::{PerformanceHistory, VolatilityAnalytics, VolatilityMetrics};
use crate::calendar::{CalendarGate, GateState};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::participant::{ParticipantFlow, ParticipantFlowAnalyzer};
use crate::regime::RegimeScorer;
use crate::sources::{CalendarSource, MarketDataProvider, ParticipantFlowSource};
use crate::strategies::selector::MarketContext;
use crate::strategies::{StrategyMandate, StrategySelector};
use crate::types::{CalendarEvent, FlowObservation, MarketSnapshot};

/// Everything one run consumes, captured before any computation starts
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    pub snapshot: MarketSnapshot,
    pub events: Vec<CalendarEvent>,
    pub flows: Vec<FlowObservation>,
}

/// Published result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub metrics: VolatilityMetrics,
    pub performance: PerformanceHistory,
    pub flow: ParticipantFlow,
    pub mandate: StrategyMandate,
}

impl AnalysisOutcome {
    pub fn gate(&self) -> &GateState {
        &self.mandate.gate
    }
}

/// Run the full pipeline on captured inputs.
///
/// Any stage failure aborts the whole run; no partial outcome exists.
pub fn analyze(inputs: &AnalysisInputs, config: &Config) -> EngineResult<AnalysisOutcome> {
    config.validate()?;
    let snapshot = &inputs.snapshot;
    let analytics = VolatilityAnalytics::new(&config.analytics);

    let ((metrics, performance), (flow, gate)) = rayon::join(
        || {
            rayon::join(
                || analytics.compute(snapshot),
                || analytics.performance_history(snapshot),
            )
        },
        || {
            rayon::join(
                || ParticipantFlowAnalyzer::new(&config.participant).analyze(&inputs.flows),
                || CalendarGate::new(&config.calendar).evaluate(snapshot.timestamp, &inputs.events),
            )
        },
    );
    let metrics = metrics?;
    let flow = flow?;

    let scorer = RegimeScorer::new(&config.regime);
    let weights = scorer.dynamic_weights(&performance)?;
    let regime = scorer.score(&metrics, &flow, &weights)?;

    let market = MarketContext {
        snapshot,
        metrics: &metrics,
        flow: &flow,
    };
    let mandate = StrategySelector::new(&config.strategy).select(&regime, &gate, &market)?;

    Ok(AnalysisOutcome {
        metrics,
        performance,
        flow,
        mandate,
    })
}

/// How a run request behaves when another run is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Wait for the active run to finish, then run
    Explicit,
    /// Give up immediately with [`EngineError::ConcurrentRunRejected`]
    Automatic,
}

pub struct AnalysisEngine {
    config: Arc<Config>,
    market: Arc<dyn MarketDataProvider>,
    calendar: Arc<dyn CalendarSource>,
    participants: Arc<dyn ParticipantFlowSource>,
    run_guard: Mutex<()>,
    latest: watch::Sender<Option<Arc<AnalysisOutcome>>>,
    runs: AtomicU64,
}

impl AnalysisEngine {
    pub fn new(
        config: Config,
        market: Arc<dyn MarketDataProvider>,
        calendar: Arc<dyn CalendarSource>,
        participants: Arc<dyn ParticipantFlowSource>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let (latest, _) = watch::channel(None);
        Ok(AnalysisEngine {
            config: Arc::new(config),
            market,
            calendar,
            participants,
            run_guard: Mutex::new(()),
            latest,
            runs: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one analysis and publish its outcome on success
    pub async fn run(&self, mode: RunMode) -> EngineResult<Arc<AnalysisOutcome>> {
        let _guard = match mode {
            RunMode::Explicit => self.run_guard.lock().await,
            RunMode::Automatic => self.run_guard.try_lock().map_err(|_| {
                debug!("automatic run skipped, analysis already in progress");
                EngineError::ConcurrentRunRejected
            })?,
        };

        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        info!(run, ?mode, "analysis run started");

        let (snapshot, events, flows) = tokio::try_join!(
            self.market.snapshot(),
            self.calendar.events(),
            self.participants.observations(),
        )?;
        debug!(
            run,
            bars = snapshot.bars.len(),
            events = events.len(),
            flows = flows.len(),
            "inputs captured"
        );

        let inputs = AnalysisInputs {
            snapshot,
            events,
            flows,
        };
        let config = Arc::clone(&self.config);
        let result = tokio::task::spawn_blocking(move || analyze(&inputs, &config))
            .await
            .map_err(|e| EngineError::Aborted(e.to_string()))?;

        let outcome = match result {
            Ok(outcome) => Arc::new(outcome),
            Err(e) => {
                warn!(run, error = %e, "analysis run failed, keeping previous result");
                return Err(e);
            }
        };

        self.latest.send_replace(Some(Arc::clone(&outcome)));
        info!(
            run,
            regime = %outcome.mandate.regime.label,
            composite = outcome.mandate.regime.composite,
            template = outcome.mandate.template.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis run published"
        );
        Ok(outcome)
    }

    /// Abandon the run after `limit`; an abandoned run publishes nothing
    pub async fn run_with_timeout(
        &self,
        mode: RunMode,
        limit: Duration,
    ) -> EngineResult<Arc<AnalysisOutcome>> {
        match tokio::time::timeout(limit, self.run(mode)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?limit, "analysis run abandoned");
                Err(EngineError::Timeout(limit))
            }
        }
    }

    /// Last completed outcome; never waits on a run in progress
    pub fn latest(&self) -> Option<Arc<AnalysisOutcome>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AnalysisOutcome>>> {
        self.latest.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }
}
