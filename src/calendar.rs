//! Economic calendar gate
//!
//! Decides whether scheduled macro events veto new entries at a given
//! instant. The gate is recomputed on every run and never errors: an empty
//! event set simply yields no veto.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CalendarConfig, VetoWindow};
use crate::types::{CalendarEvent, EventKind, ImpactTier};

/// Recommended time to flatten positions ahead of a central-bank decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareOffAdvice {
    pub event_title: String,
    pub event_at: DateTime<Utc>,
    pub square_off_by: DateTime<Utc>,
}

/// Result of one gate evaluation, valid for the run that computed it only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub evaluated_at: DateTime<Utc>,
    pub vetoed: bool,
    pub reason: String,
    pub governing_event: Option<CalendarEvent>,
    pub veto_until: Option<DateTime<Utc>>,
    pub square_off: Option<SquareOffAdvice>,
}

impl GateState {
    pub fn open(evaluated_at: DateTime<Utc>) -> Self {
        GateState {
            evaluated_at,
            vetoed: false,
            reason: "No high-impact events in veto window".to_string(),
            governing_event: None,
            veto_until: None,
            square_off: None,
        }
    }
}

pub struct CalendarGate<'a> {
    config: &'a CalendarConfig,
}

impl<'a> CalendarGate<'a> {
    pub fn new(config: &'a CalendarConfig) -> Self {
        CalendarGate { config }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    fn veto_window(&self, kind: EventKind) -> VetoWindow {
        match kind {
            EventKind::CentralBank => self.config.central_bank,
            EventKind::MacroRelease => self.config.macro_release,
            EventKind::Expiry => self.config.expiry,
        }
    }

    /// Interval during which `event` vetoes entries, inclusive at both ends
    pub fn window(&self, event: &CalendarEvent) -> (DateTime<Utc>, DateTime<Utc>) {
        let w = self.veto_window(event.kind);
        let mut start = event.scheduled_at - hours(w.blackout_hours);
        let mut end = event.scheduled_at + hours(w.cooldown_hours);

        if self.config.same_day_blackout {
            let offset = self.offset();
            let local_date = event.scheduled_at.with_timezone(&offset).date_naive();
            let day_start = local_date
                .and_time(NaiveTime::MIN)
                .and_local_timezone(offset)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(day_start) = day_start {
                start = start.min(day_start);
                end = end.max(day_start + Duration::days(1) - Duration::seconds(1));
            }
        }
        (start, end)
    }

    pub fn evaluate(&self, now: DateTime<Utc>, events: &[CalendarEvent]) -> GateState {
        let mut state = GateState::open(now);
        state.square_off = self.square_off(now, events);

        let governing = events
            .iter()
            .filter(|e| e.impact == ImpactTier::High)
            .map(|e| (e, self.window(e)))
            .filter(|(_, (start, end))| *start <= now && now <= *end)
            .max_by_key(|(_, (start, end))| (*end - *start, *end));

        if let Some((event, (_, end))) = governing {
            let local = event.scheduled_at.with_timezone(&self.offset());
            state.vetoed = true;
            state.reason = format!(
                "{} ({:?}) scheduled {}",
                event.title,
                event.kind,
                local.format("%Y-%m-%d %H:%M %:z")
            );
            state.governing_event = Some(event.clone());
            state.veto_until = Some(end);
            debug!(event = %event.title, until = %end, "calendar veto active");
        }
        state
    }

    /// Nearest upcoming high-impact central-bank event inside the advisory horizon
    pub fn square_off(
        &self,
        now: DateTime<Utc>,
        events: &[CalendarEvent],
    ) -> Option<SquareOffAdvice> {
        let cfg = self.config;
        let nearest = events
            .iter()
            .filter(|e| e.kind == EventKind::CentralBank && e.impact == ImpactTier::High)
            .filter(|e| e.scheduled_at > now)
            .min_by_key(|e| e.scheduled_at)?;

        let hours_until = (nearest.scheduled_at - now).num_seconds() as f64 / 3600.0;
        if hours_until > cfg.square_off_horizon_hours {
            return None;
        }

        let square_off_by = if hours_until <= 24.0 {
            nearest.scheduled_at - hours(cfg.square_off_lead_hours)
        } else {
            let offset = self.offset();
            let day_before = nearest.scheduled_at.with_timezone(&offset).date_naive() - Duration::days(1);
            let time = NaiveTime::from_hms_opt(cfg.square_off_hour, 0, 0)?;
            day_before
                .and_time(time)
                .and_local_timezone(offset)
                .single()?
                .with_timezone(&Utc)
        };

        Some(SquareOffAdvice {
            event_title: nearest.title.clone(),
            event_at: nearest.scheduled_at,
            square_off_by,
        })
    }
}

fn hours(h: f64) -> Duration {
    Duration::seconds((h * 3600.0).round() as i64)
}

/// Classify a raw calendar title by keyword lists
pub fn classify_title(title: &str, config: &CalendarConfig) -> (EventKind, ImpactTier) {
    let has = |keywords: &[String]| keywords.iter().any(|k| title.contains(k.as_str()));

    if has(&config.veto_keywords) {
        (EventKind::CentralBank, ImpactTier::High)
    } else if has(&config.high_impact_keywords) {
        (EventKind::MacroRelease, ImpactTier::High)
    } else if has(&config.medium_impact_keywords) {
        (EventKind::MacroRelease, ImpactTier::Medium)
    } else if title.to_ascii_lowercase().contains("expiry") {
        (EventKind::Expiry, ImpactTier::Low)
    } else {
        (EventKind::MacroRelease, ImpactTier::Low)
    }
}
