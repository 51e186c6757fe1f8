//! Integration tests for the volguard engine
//!
//! These tests verify that all components work together correctly.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use volguard::sources::{
    CalendarSource, FileCalendar, FileMarketData, FileParticipantFlow, MarketDataProvider,
    ParticipantFlowSource,
};
use volguard::state_manager::SqliteStateManager;
use volguard::strategies::{strikes, LegSide, NoTradeReason, SpreadSide, StrikeRule};
use volguard::{
    analyze, AnalysisEngine, AnalysisInputs, CalendarEvent, Candle, Config, EngineError,
    EventKind, FlowObservation, ImpactTier, MarketSnapshot, OptionKind, OptionQuote,
    ProviderError, RegimeLabel, RunMode, StrategyTemplate, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap()
}

/// Alternating up/down daily bars with a constant intraday range
fn generate_zigzag_bars(count: usize, log_return: f64, half_range: f64) -> Vec<Candle> {
    generate_zigzag_bars_from(start_time(), count, log_return, half_range)
}

fn generate_zigzag_bars_from(
    start: DateTime<Utc>,
    count: usize,
    log_return: f64,
    half_range: f64,
) -> Vec<Candle> {
    let mut close = 24_000.0;
    (0..count)
        .map(|i| {
            if i > 0 {
                let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
                close *= (sign * log_return).exp();
            }
            Candle {
                datetime: start + Duration::days(i as i64),
                open: close,
                high: close * (1.0 + half_range),
                low: close * (1.0 - half_range),
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

/// Full strike ladder for a single weekly expiry
fn generate_chain(expiry: NaiveDate, iv: f64) -> Vec<OptionQuote> {
    (0..=40)
        .map(|i| 23_000.0 + i as f64 * 50.0)
        .flat_map(|strike| {
            [OptionKind::Call, OptionKind::Put].map(|kind| OptionQuote {
                expiry,
                strike,
                kind,
                iv,
                open_interest: 10_000.0,
                volume: 500.0,
            })
        })
        .collect()
}

fn snapshot(bars: Vec<Candle>, chain_iv: f64) -> MarketSnapshot {
    let last = bars.last().unwrap();
    let expiry = last.datetime.date_naive() + Duration::days(6);
    MarketSnapshot {
        timestamp: last.datetime,
        underlying: Symbol::new("NIFTY"),
        spot: last.close,
        chain: generate_chain(expiry, chain_iv),
        iv_history: (0..30).map(|i| 10.0 + i as f64 * 20.0 / 29.0).collect(),
        bars,
    }
}

/// Quiet market: 30 daily bars, ~12% realized vol, IV near the bottom of its history
fn calm_snapshot() -> MarketSnapshot {
    snapshot(generate_zigzag_bars(30, 0.00756, 0.0063), 13.0)
}

/// Violent market: realized vol far above the reference range, IV at its peak
fn stressed_snapshot() -> MarketSnapshot {
    snapshot(generate_zigzag_bars(60, 0.04, 0.03), 40.0)
}

fn flat_flows() -> Vec<FlowObservation> {
    vec![FlowObservation {
        date: NaiveDate::from_ymd_opt(2026, 10, 29).unwrap(),
        foreign: Some(0.0),
        domestic: Some(0.0),
    }]
}

fn central_bank_event(at: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        title: "RBI Monetary Policy".to_string(),
        kind: EventKind::CentralBank,
        scheduled_at: at,
        impact: ImpactTier::High,
        scope: "IN".to_string(),
    }
}

fn inputs(snapshot: MarketSnapshot, events: Vec<CalendarEvent>) -> AnalysisInputs {
    AnalysisInputs {
        snapshot,
        events,
        flows: flat_flows(),
    }
}

struct MockMarket {
    snapshot: MarketSnapshot,
    delay: StdDuration,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockMarket {
    fn new(snapshot: MarketSnapshot) -> Self {
        MockMarket {
            snapshot,
            delay: StdDuration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(snapshot: MarketSnapshot, delay: StdDuration) -> Self {
        MockMarket {
            delay,
            ..Self::new(snapshot)
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn snapshot(&self) -> Result<MarketSnapshot, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("quotes feed down".into()));
        }
        Ok(self.snapshot.clone())
    }
}

struct MockCalendar(Vec<CalendarEvent>);

#[async_trait]
impl CalendarSource for MockCalendar {
    async fn events(&self) -> Result<Vec<CalendarEvent>, ProviderError> {
        Ok(self.0.clone())
    }
}

struct MockFlows;

#[async_trait]
impl ParticipantFlowSource for MockFlows {
    async fn observations(&self) -> Result<Vec<FlowObservation>, ProviderError> {
        Ok(flat_flows())
    }
}

fn engine_with(market: Arc<MockMarket>) -> Arc<AnalysisEngine> {
    Arc::new(
        AnalysisEngine::new(
            Config::default(),
            market,
            Arc::new(MockCalendar(Vec::new())),
            Arc::new(MockFlows),
        )
        .unwrap(),
    )
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn test_calm_market_selects_iron_fly() {
    let config = Config::default();
    let outcome = analyze(&inputs(calm_snapshot(), Vec::new()), &config).unwrap();
    let mandate = &outcome.mandate;

    assert_eq!(mandate.regime.label, RegimeLabel::Low);
    assert!(mandate.regime.composite < 25.0);
    assert!(!mandate.gate.vetoed);

    let StrategyTemplate::IronFly(plan) = &mandate.template else {
        panic!("expected iron fly, got {}", mandate.template.name());
    };
    assert_eq!(plan.legs.len(), 4);
    let shorts: Vec<f64> = plan
        .legs
        .iter()
        .filter(|l| l.side == LegSide::Sell)
        .map(|l| l.strike)
        .collect();
    assert_eq!(shorts.len(), 2);
    assert_eq!(shorts[0], shorts[1]);
    assert_eq!(plan.strike_interval, 50.0);

    // Wings sit one expected move out, priced off conditional volatility
    let StrikeRule::StdDevMultiple { wing, .. } = config.strategy.iron_fly.strike_rule else {
        panic!("iron fly uses std-dev strikes by default");
    };
    let metrics = &outcome.metrics;
    let expected_move =
        strikes::expected_move(plan.spot, metrics.conditional_vol, plan.days_to_expiry);
    let expected_wing = strikes::round_to(
        wing * expected_move * strikes::wing_factor(metrics.iv_percentile),
        plan.strike_interval,
    )
    .max(config.strategy.min_wing_intervals as f64 * plan.strike_interval);
    assert_eq!(plan.pricing_vol, metrics.conditional_vol);
    assert_eq!(plan.expected_move, expected_move);
    assert_eq!(plan.wing_width, expected_wing);

    let call_long = plan
        .legs
        .iter()
        .find(|l| l.kind == OptionKind::Call && l.side == LegSide::Buy)
        .unwrap();
    assert_eq!(call_long.strike, shorts[0] + expected_wing);

    // Small wing keeps the loss budget loose, so size sits at the cap
    assert_eq!(plan.lots, config.strategy.iron_fly.max_lots);
    assert_eq!(plan.quantity, plan.lots * config.strategy.lot_size);
}

#[test]
fn test_metrics_are_in_expected_ranges() {
    let outcome = analyze(&inputs(calm_snapshot(), Vec::new()), &Config::default()).unwrap();
    let m = &outcome.metrics;

    assert!((11.0..14.0).contains(&m.realized_vol), "rv {}", m.realized_vol);
    assert!((10.0..14.0).contains(&m.parkinson_vol), "pk {}", m.parkinson_vol);
    assert!(m.conditional_vol > 0.0);
    assert!(m.vol_of_vol >= 0.0);
    assert_eq!(m.atm_iv, 13.0);
    assert!((0.0..=100.0).contains(&m.iv_percentile));
    assert!(!outcome.performance.is_empty());
}

#[test]
fn test_weights_stay_within_bounds_and_sum_to_one() {
    let config = Config::default();
    let outcome = analyze(&inputs(calm_snapshot(), Vec::new()), &config).unwrap();
    let weights = &outcome.mandate.regime.weights;

    assert!((weights.sum() - 1.0).abs() < 1e-6);
    for (_, w) in weights.iter() {
        assert!(w >= config.regime.weight_floor - 1e-9);
        assert!(w <= config.regime.weight_ceiling + 1e-9);
    }
}

#[test]
fn test_stressed_market_template_follows_regime() {
    let outcome = analyze(&inputs(stressed_snapshot(), Vec::new()), &Config::default()).unwrap();
    let mandate = &outcome.mandate;

    assert!(mandate.regime.composite > 50.0);
    match (mandate.regime.label, &mandate.template) {
        (RegimeLabel::EventDriven, template) => assert_eq!(
            *template,
            StrategyTemplate::NoTrade {
                reason: NoTradeReason::EventDrivenRegime
            }
        ),
        (RegimeLabel::High, StrategyTemplate::CreditSpread(plan)) => {
            // Flat flows give no bullish signal, so the call side is sold
            assert_eq!(plan.spread_side, Some(SpreadSide::BearCall));
            assert_eq!(plan.legs.len(), 2);
            assert!(plan.legs.iter().all(|l| l.kind == OptionKind::Call));
            assert!(plan.lots >= 1);
        }
        (RegimeLabel::Elevated, StrategyTemplate::IronCondor(plan)) => {
            assert_eq!(plan.legs.len(), 4);
            assert_eq!(plan.spread_side, None);
        }
        (label, template) => panic!("{} regime produced {}", label, template.name()),
    }
}

#[test]
fn test_central_bank_event_vetoes_any_regime() {
    for snap in [calm_snapshot(), stressed_snapshot()] {
        let event_at = snap.timestamp + Duration::hours(3);
        let outcome =
            analyze(&inputs(snap, vec![central_bank_event(event_at)]), &Config::default())
                .unwrap();
        let mandate = &outcome.mandate;

        assert!(mandate.gate.vetoed);
        assert_eq!(
            mandate.template,
            StrategyTemplate::NoTrade {
                reason: NoTradeReason::CalendarVeto
            }
        );
        assert!(mandate.gate.veto_until.is_some());
    }
}

#[test]
fn test_distant_event_only_advises_square_off() {
    let snap = calm_snapshot();
    let event_at = snap.timestamp + Duration::hours(40);
    let outcome =
        analyze(&inputs(snap, vec![central_bank_event(event_at)]), &Config::default()).unwrap();

    assert!(!outcome.mandate.gate.vetoed);
    assert!(outcome.mandate.template.is_trade());
    assert!(outcome.mandate.gate.square_off.is_some());
    assert!(!outcome.mandate.warnings.is_empty());
}

#[test]
fn test_analysis_is_deterministic() {
    let config = Config::default();
    let run = || analyze(&inputs(calm_snapshot(), Vec::new()), &config).unwrap();
    let first = run();
    let second = run();

    assert_eq!(first.mandate.fingerprint, second.mandate.fingerprint);
    assert_eq!(first.mandate.fingerprint.len(), 64);
    assert_eq!(
        first.mandate.to_json().unwrap(),
        second.mandate.to_json().unwrap()
    );
}

#[test]
fn test_short_history_is_insufficient_data() {
    let short = snapshot(generate_zigzag_bars(10, 0.00756, 0.0063), 13.0);
    let result = analyze(&inputs(short, Vec::new()), &Config::default());
    assert!(matches!(result, Err(EngineError::InsufficientData { .. })));
}

#[test]
fn test_missing_flows_are_insufficient_data() {
    let mut run_inputs = inputs(calm_snapshot(), Vec::new());
    run_inputs.flows.clear();
    let result = analyze(&run_inputs, &Config::default());
    assert!(matches!(result, Err(EngineError::InsufficientData { .. })));
}

#[test]
fn test_invalid_weights_rejected_before_running() {
    let mut config = Config::default();
    config.regime.weight_floor = 0.5;
    let result = analyze(&inputs(calm_snapshot(), Vec::new()), &config);
    assert!(matches!(result, Err(EngineError::InvalidWeightConfig(_))));
}

// =============================================================================
// Run Coordination Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_publishes_latest() {
    let engine = engine_with(Arc::new(MockMarket::new(calm_snapshot())));
    let mut updates = engine.subscribe();
    assert!(engine.latest().is_none());

    let outcome = engine.run(RunMode::Explicit).await.unwrap();

    updates.changed().await.unwrap();
    let published = engine.latest().unwrap();
    assert_eq!(published.mandate.fingerprint, outcome.mandate.fingerprint);
    assert!(!engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_automatic_run_rejected_while_explicit_waits() {
    let market = Arc::new(MockMarket::slow(
        calm_snapshot(),
        StdDuration::from_millis(300),
    ));
    let engine = engine_with(Arc::clone(&market));

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(RunMode::Explicit).await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(engine.is_running());

    let rejected = engine.run(RunMode::Automatic).await;
    assert!(matches!(rejected, Err(EngineError::ConcurrentRunRejected)));

    // Explicit request queues behind the active run instead of failing
    let second = engine.run(RunMode::Explicit).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(market.calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.mandate.fingerprint, second.mandate.fingerprint);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latest_does_not_wait_for_active_run() {
    let engine = engine_with(Arc::new(MockMarket::slow(
        calm_snapshot(),
        StdDuration::from_millis(300),
    )));
    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(RunMode::Explicit).await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    assert!(engine.is_running());
    assert!(engine.latest().is_none());

    running.await.unwrap().unwrap();
    assert!(engine.latest().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_publishes_nothing() {
    let engine = engine_with(Arc::new(MockMarket::slow(
        calm_snapshot(),
        StdDuration::from_millis(500),
    )));

    let result = engine
        .run_with_timeout(RunMode::Explicit, StdDuration::from_millis(50))
        .await;

    assert!(matches!(result, Err(EngineError::Timeout(_))));
    assert!(engine.latest().is_none());
    assert!(!engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_run_keeps_previous_result() {
    let market = Arc::new(MockMarket::new(calm_snapshot()));
    let engine = engine_with(Arc::clone(&market));

    let good = engine.run(RunMode::Explicit).await.unwrap();
    market.failing.store(true, Ordering::SeqCst);

    let failed = engine.run(RunMode::Automatic).await;
    match failed {
        Err(EngineError::Provider(ProviderError::Unavailable(msg))) => {
            assert_eq!(msg, "quotes feed down");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let latest = engine.latest().unwrap();
    assert_eq!(latest.mandate.fingerprint, good.mandate.fingerprint);
}

// =============================================================================
// File Sources and Persistence
// =============================================================================

fn write_data_dir(dir: &std::path::Path, snap: &MarketSnapshot) {
    let mut bars = csv::Writer::from_path(dir.join("bars.csv")).unwrap();
    bars.write_record(["datetime", "open", "high", "low", "close", "volume"])
        .unwrap();
    for c in &snap.bars {
        bars.write_record([
            c.datetime.to_rfc3339(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
        ])
        .unwrap();
    }
    bars.flush().unwrap();

    let mut chain = csv::Writer::from_path(dir.join("chain.csv")).unwrap();
    chain
        .write_record(["expiry", "strike", "kind", "iv", "oi", "volume"])
        .unwrap();
    for q in &snap.chain {
        let kind = match q.kind {
            OptionKind::Call => "CE",
            OptionKind::Put => "PE",
        };
        chain
            .write_record([
                q.expiry.to_string(),
                q.strike.to_string(),
                kind.to_string(),
                q.iv.to_string(),
                q.open_interest.to_string(),
                q.volume.to_string(),
            ])
            .unwrap();
    }
    chain.flush().unwrap();

    let iv: String = std::iter::once("iv".to_string())
        .chain(snap.iv_history.iter().map(|v| v.to_string()))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(dir.join("iv_history.csv"), iv + "\n").unwrap();

    std::fs::write(
        dir.join("participant_flow.csv"),
        "date,foreign,domestic\n2026-10-28,12000,-4000\n2026-10-29,-3000,\n",
    )
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_sources_drive_engine() {
    let dir = tempfile::tempdir().unwrap();
    let snap = calm_snapshot();
    write_data_dir(dir.path(), &snap);

    let engine = AnalysisEngine::new(
        Config::default(),
        Arc::new(FileMarketData::new(dir.path(), "NIFTY").with_as_of(snap.timestamp)),
        Arc::new(FileCalendar::new(dir.path().join("events.json"))),
        Arc::new(FileParticipantFlow::new(dir.path().join("participant_flow.csv"))),
    )
    .unwrap();

    let outcome = engine.run(RunMode::Explicit).await.unwrap();
    assert_eq!(outcome.mandate.generated_at, snap.timestamp);
    assert_eq!(outcome.flow.observations, 2);
    assert_eq!(outcome.mandate.regime.label, RegimeLabel::Low);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_calendar_events_veto() {
    let dir = tempfile::tempdir().unwrap();
    let snap = calm_snapshot();
    write_data_dir(dir.path(), &snap);
    let events = vec![central_bank_event(snap.timestamp + Duration::hours(2))];
    std::fs::write(
        dir.path().join("events.json"),
        serde_json::to_string(&events).unwrap(),
    )
    .unwrap();

    let engine = AnalysisEngine::new(
        Config::default(),
        Arc::new(FileMarketData::new(dir.path(), "NIFTY").with_as_of(snap.timestamp)),
        Arc::new(FileCalendar::new(dir.path().join("events.json"))),
        Arc::new(FileParticipantFlow::new(dir.path().join("participant_flow.csv"))),
    )
    .unwrap();

    let outcome = engine.run(RunMode::Explicit).await.unwrap();
    assert!(outcome.gate().vetoed);
    assert!(!outcome.mandate.template.is_trade());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_snapshot_gates_at_capture_time() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    // Last stored bar is two days old; the policy decision is an hour away
    let snap = snapshot(
        generate_zigzag_bars_from(now - Duration::days(31), 30, 0.00756, 0.0063),
        13.0,
    );
    assert!(snap.timestamp < now - Duration::hours(47));
    write_data_dir(dir.path(), &snap);
    let events = vec![central_bank_event(now + Duration::hours(1))];
    std::fs::write(
        dir.path().join("events.json"),
        serde_json::to_string(&events).unwrap(),
    )
    .unwrap();

    let engine = AnalysisEngine::new(
        Config::default(),
        Arc::new(FileMarketData::new(dir.path(), "NIFTY")),
        Arc::new(FileCalendar::new(dir.path().join("events.json"))),
        Arc::new(FileParticipantFlow::new(dir.path().join("participant_flow.csv"))),
    )
    .unwrap();

    let outcome = engine.run(RunMode::Automatic).await.unwrap();
    assert!(outcome.gate().evaluated_at >= now);
    assert!(outcome.mandate.generated_at >= now);
    assert!(outcome.gate().vetoed);
    assert_eq!(
        outcome.mandate.template,
        StrategyTemplate::NoTrade {
            reason: NoTradeReason::CalendarVeto
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_bars_file_is_provider_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = AnalysisEngine::new(
        Config::default(),
        Arc::new(FileMarketData::new(dir.path(), "NIFTY")),
        Arc::new(FileCalendar::new(dir.path().join("events.json"))),
        Arc::new(MockFlows),
    )
    .unwrap();

    let result = engine.run(RunMode::Explicit).await;
    assert!(matches!(
        result,
        Err(EngineError::Provider(ProviderError::Io(_)))
    ));
    assert!(engine.latest().is_none());
}

#[test]
fn test_state_manager_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");
    let backup = dir.path().join("state.json");
    let state = SqliteStateManager::new(&db, &backup, true).unwrap();

    assert!(state.latest().unwrap().is_none());

    let config = Config::default();
    let calm = analyze(&inputs(calm_snapshot(), Vec::new()), &config).unwrap();
    let snap = calm_snapshot();
    let event_at = snap.timestamp + Duration::hours(2);
    let vetoed = analyze(&inputs(snap, vec![central_bank_event(event_at)]), &config).unwrap();

    let first = state.save_outcome(&calm, &config.fingerprint()).unwrap();
    let second = state.save_outcome(&vetoed, &config.fingerprint()).unwrap();
    assert!(second > first);

    let latest = state.latest().unwrap().unwrap();
    assert_eq!(latest.id, second);
    assert_eq!(latest.outcome.mandate.fingerprint, vetoed.mandate.fingerprint);
    assert!(latest.outcome.gate().vetoed);
    assert_eq!(latest.config_hash, config.fingerprint());

    let recent = state.recent(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent[0].vetoed);
    assert_eq!(recent[1].template, "Iron Fly");
    assert_eq!(recent[1].regime, "Low");

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&backup).unwrap()).unwrap();
    assert_eq!(exported["history"].as_array().unwrap().len(), 2);
}
