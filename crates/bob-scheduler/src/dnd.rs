//! DND engine (spec.md §4.4): a pure predicate over a scheduled window
//! (with overnight wrap) and an ad-hoc override.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Persisted ad-hoc override (`data/dnd-state.json`, spec.md §3/§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DndState {
    pub adhoc: Option<AdhocDnd>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdhocDnd {
    pub until: DateTime<Utc>,
    pub reason: Option<String>,
}

/// The scheduled window, read from `[dnd]` in `config.toml`.
#[derive(Debug, Clone)]
pub struct DndWindow {
    pub enabled: bool,
    /// Minutes since midnight, wall-clock in `tz`.
    pub start_minutes: u32,
    pub end_minutes: u32,
    pub tz: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DndStatus {
    pub active: bool,
    pub reason: Option<&'static str>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl DndStatus {
    fn inactive() -> Self {
        Self {
            active: false,
            reason: None,
            ends_at: None,
        }
    }
}

/// `isActive(now)` (spec.md §4.4). Mutates `state` to lazily clear an
/// expired ad-hoc override; callers are expected to persist `state` back to
/// disk when this returns `true` for that clear (see
/// [`DndState::expire_if_past`] usage in the scheduler loop).
pub fn is_active(window: &DndWindow, state: &mut DndState, now: DateTime<Utc>) -> DndStatus {
    if let Some(adhoc) = &state.adhoc {
        if adhoc.until > now {
            return DndStatus {
                active: true,
                reason: Some("adhoc"),
                ends_at: Some(adhoc.until),
            };
        }
        // Expired — clear lazily.
        state.adhoc = None;
    }

    if !window.enabled {
        return DndStatus::inactive();
    }

    let local = now.with_timezone(&window.tz);
    let minute_of_day = local.hour() * 60 + local.minute();

    let active = if window.start_minutes <= window.end_minutes {
        minute_of_day >= window.start_minutes && minute_of_day < window.end_minutes
    } else {
        // Overnight wrap: e.g. 22:00–08:00.
        minute_of_day >= window.start_minutes || minute_of_day < window.end_minutes
    };

    if !active {
        return DndStatus::inactive();
    }

    DndStatus {
        active: true,
        reason: Some("scheduled"),
        ends_at: Some(next_occurrence_of(window.end_minutes, window.tz, now)),
    }
}

/// The next wall-clock occurrence of `minute_of_day` in `tz` strictly after
/// `now`, converted back to UTC. DST-safe: built from the zone's own local
/// date + time-of-day via `TimeZone::from_local_datetime`, which resolves
/// ambiguous/non-existent local times by picking the earliest valid UTC
/// instant — the fixed-point adjustment spec.md §9 alludes to.
fn next_occurrence_of(minute_of_day: u32, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let hour = minute_of_day / 60;
    let minute = minute_of_day % 60;

    let mut candidate_date = local_now.date_naive();
    loop {
        let naive_time = chrono::NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        let naive_dt = candidate_date.and_time(naive_time);
        match tz.from_local_datetime(&naive_dt).earliest() {
            Some(candidate) => {
                let candidate_utc = candidate.with_timezone(&Utc);
                if candidate_utc > now {
                    return candidate_utc;
                }
            }
            None => {
                // Non-existent local time (spring-forward gap): skip a day.
            }
        }
        candidate_date += Duration::days(1);
    }
}

impl DndState {
    /// Clear an expired ad-hoc override, returning `true` if it changed.
    pub fn expire_if_past(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(adhoc) = &self.adhoc {
            if adhoc.until <= now {
                self.adhoc = None;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u32, end: u32) -> DndWindow {
        DndWindow {
            enabled: true,
            start_minutes: start,
            end_minutes: end,
            tz: chrono_tz::UTC,
        }
    }

    #[test]
    fn inactive_when_disabled() {
        let mut w = window(22 * 60, 8 * 60);
        w.enabled = false;
        let mut state = DndState::default();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 23, 0, 0).unwrap();
        assert!(!is_active(&w, &mut state, now).active);
    }

    #[test]
    fn overnight_wrap_active_late_night() {
        let w = window(22 * 60, 8 * 60);
        let mut state = DndState::default();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 23, 30, 0).unwrap();
        let status = is_active(&w, &mut state, now);
        assert!(status.active);
        assert_eq!(status.reason, Some("scheduled"));
        let ends = status.ends_at.unwrap();
        assert_eq!(ends, Utc.with_ymd_and_hms(2026, 7, 28, 8, 0, 0).unwrap());
    }

    #[test]
    fn overnight_wrap_active_early_morning() {
        let w = window(22 * 60, 8 * 60);
        let mut state = DndState::default();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 3, 0, 0).unwrap();
        let status = is_active(&w, &mut state, now);
        assert!(status.active);
        let ends = status.ends_at.unwrap();
        assert_eq!(ends, Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap());
    }

    #[test]
    fn overnight_wrap_inactive_midday() {
        let w = window(22 * 60, 8 * 60);
        let mut state = DndState::default();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap();
        assert!(!is_active(&w, &mut state, now).active);
    }

    #[test]
    fn adhoc_overrides_schedule() {
        let w = window(22 * 60, 8 * 60);
        let until = Utc.with_ymd_and_hms(2026, 7, 27, 16, 0, 0).unwrap();
        let mut state = DndState {
            adhoc: Some(AdhocDnd {
                until,
                reason: Some("focus".into()),
            }),
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap();
        let status = is_active(&w, &mut state, now);
        assert!(status.active);
        assert_eq!(status.reason, Some("adhoc"));
        assert_eq!(status.ends_at, Some(until));
    }

    #[test]
    fn expired_adhoc_is_cleared_and_falls_through() {
        let w = window(22 * 60, 8 * 60);
        let until = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let mut state = DndState {
            adhoc: Some(AdhocDnd {
                until,
                reason: None,
            }),
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap();
        let status = is_active(&w, &mut state, now);
        assert!(!status.active);
        assert!(state.adhoc.is_none());
    }
}
