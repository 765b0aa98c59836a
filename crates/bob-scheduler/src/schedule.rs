//! Schedule string parsing and next-run computation (spec.md §4.3).
//!
//! `parse_schedule` is a pure function: given a human-authored schedule
//! string, it returns a `(ScheduleKind, spec)` pair, trying each recognized
//! form in order. `next_run_of` then advances a `(kind, spec)` pair past a
//! given instant.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use cron::Schedule as CronSchedule;

use crate::types::ScheduleKind;

/// The `cron` crate parses 6/7-field expressions (seconds first); spec.md's
/// forms use plain 5-field cron. We adapt by prepending a literal `0`
/// seconds field before handing the expression to `cron::Schedule`.
fn to_cron_schedule(five_field: &str) -> Option<CronSchedule> {
    let with_seconds = format!("0 {five_field}");
    CronSchedule::from_str(&with_seconds).ok()
}

/// `nextRunOf(kind, spec, from)` — spec.md §4.3.
pub fn next_run_of(kind: ScheduleKind, spec: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::At => {
            let at = DateTime::parse_from_rfc3339(spec)
                .ok()?
                .with_timezone(&Utc);
            Some(at.max(from))
        }
        ScheduleKind::Every => {
            let secs: i64 = spec.parse().ok()?;
            Some(from + Duration::seconds(secs))
        }
        ScheduleKind::Cron => {
            let schedule = to_cron_schedule(spec)?;
            schedule.after(&from).next()
        }
    }
}

/// Recognized schedule forms, tried in the order spec.md §4.3 lists them.
pub fn parse_schedule(s: &str, now: DateTime<Utc>) -> Option<(ScheduleKind, String)> {
    let s = s.trim();

    if let Some(rest) = strip_ci(s, "cron ") {
        // Form 1: `cron <expr>`.
        if to_cron_schedule(rest.trim()).is_some() {
            return Some((ScheduleKind::Cron, rest.trim().to_string()));
        }
        return None;
    }

    if let Some(rest) = strip_ci(s, "every ") {
        // Form 2: `every <N>{s|m|h|d}`.
        if let Some(secs) = parse_short_duration(rest.trim()) {
            return Some((ScheduleKind::Every, secs.to_string()));
        }
        // Form 5: `every (day|week|<weekday>|month) at <H>[:MM] [am|pm]`.
        if let Some(cron_expr) = parse_every_calendar(rest.trim()) {
            return Some((ScheduleKind::Cron, cron_expr));
        }
        return None;
    }

    // Form 3: bare `<N>{s|m|h|d}`.
    if let Some(secs) = parse_short_duration(s) {
        let at = now + Duration::seconds(secs);
        return Some((ScheduleKind::At, at.to_rfc3339()));
    }

    // Form 4: `in <N> (second|minute|hour|day|week)s?`.
    if let Some(rest) = strip_ci(s, "in ") {
        if let Some(secs) = parse_long_duration(rest.trim()) {
            let at = now + Duration::seconds(secs);
            return Some((ScheduleKind::At, at.to_rfc3339()));
        }
    }

    // Form 6: `tomorrow [at] <H>[:MM] [am|pm]`.
    if let Some(rest) = strip_ci(s, "tomorrow") {
        let rest = strip_ci(rest.trim(), "at").unwrap_or(rest.trim()).trim();
        if let Some(time) = parse_clock_time(rest) {
            let tomorrow = now.date_naive() + Duration::days(1);
            let at = Utc
                .from_utc_datetime(&tomorrow.and_time(time))
                .with_timezone(&Utc);
            return Some((ScheduleKind::At, at.to_rfc3339()));
        }
    }

    // Form 7: `today [at] <H>[:MM] [am|pm]`.
    if let Some(rest) = strip_ci(s, "today") {
        let rest = strip_ci(rest.trim(), "at").unwrap_or(rest.trim()).trim();
        if let Some(time) = parse_clock_time(rest) {
            let mut at = Utc
                .from_utc_datetime(&now.date_naive().and_time(time))
                .with_timezone(&Utc);
            if at <= now {
                at += Duration::days(1);
            }
            return Some((ScheduleKind::At, at.to_rfc3339()));
        }
    }

    // Form 8: `[at] <H>[:MM] (am|pm)`.
    {
        let rest = strip_ci(s, "at").unwrap_or(s).trim();
        if let Some(time) = parse_clock_time(rest) {
            let mut at = Utc
                .from_utc_datetime(&now.date_naive().and_time(time))
                .with_timezone(&Utc);
            if at <= now {
                at += Duration::days(1);
            }
            return Some((ScheduleKind::At, at.to_rfc3339()));
        }
    }

    // Form 9: fallback — rfc3339/rfc2822, "finite" Date.parse equivalent.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some((ScheduleKind::At, dt.with_timezone(&Utc).to_rfc3339()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some((ScheduleKind::At, dt.with_timezone(&Utc).to_rfc3339()));
    }

    None
}

fn strip_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// `<N>{s|m|h|d}` → seconds.
fn parse_short_duration(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num_part, unit) = s.split_at(s.len() - 1);
    let n: i64 = num_part.parse().ok()?;
    let mult = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    Some(n * mult)
}

/// `<N> (second|minute|hour|day|week)s?` → seconds.
fn parse_long_duration(s: &str) -> Option<i64> {
    let mut parts = s.split_whitespace();
    let n: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.trim_end_matches('s');
    if parts.next().is_some() {
        return None;
    }
    let mult = match unit {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86_400,
        "week" => 604_800,
        _ => return None,
    };
    Some(n * mult)
}

/// `<H>[:MM] [am|pm]` → `NaiveTime`. Accepts 24h (`18:30`) or 12h (`6:30pm`, `6pm`).
fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    let (digits, meridiem) = if let Some(d) = s.strip_suffix("am") {
        (d.trim(), Some(false))
    } else if let Some(d) = s.strip_suffix("pm") {
        (d.trim(), Some(true))
    } else {
        (s.as_str(), None)
    };

    let mut parts = digits.splitn(2, ':');
    let mut hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };

    if let Some(is_pm) = meridiem {
        if !(1..=12).contains(&hour) || minute > 59 {
            return None;
        }
        hour %= 12;
        if is_pm {
            hour += 12;
        }
    } else if hour > 23 || minute > 59 {
        return None;
    }

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// `(day|week|<weekday>|month) at <H>[:MM] [am|pm]` → derived 5-field cron.
///
/// Weekday maps Mon=1…Sun=0 (spec.md §4.3); `month` derives `day-of-month 1`;
/// `week` aliases `monday`.
fn parse_every_calendar(s: &str) -> Option<String> {
    let mut parts = s.splitn(2, " at ");
    let unit = parts.next()?.trim();
    let time_str = parts.next()?.trim();
    let time = parse_clock_time(time_str)?;
    let (hour, minute) = (time.hour(), time.minute());

    let (dom, dow) = match unit {
        "day" => ("*", "*"),
        "week" | "monday" => ("*", "1"),
        "tuesday" => ("*", "2"),
        "wednesday" => ("*", "3"),
        "thursday" => ("*", "4"),
        "friday" => ("*", "5"),
        "saturday" => ("*", "6"),
        "sunday" => ("*", "0"),
        "month" => ("1", "*"),
        _ => return None,
    };

    Some(format!("{minute} {hour} {dom} * {dow}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[test]
    fn short_duration_minutes() {
        let (kind, spec) = parse_schedule("5m", now()).unwrap();
        assert_eq!(kind, ScheduleKind::At);
        let at = DateTime::parse_from_rfc3339(&spec).unwrap();
        assert_eq!(at.with_timezone(&Utc), now() + Duration::minutes(5));
    }

    #[test]
    fn every_short_duration() {
        let (kind, spec) = parse_schedule("every 30s", now()).unwrap();
        assert_eq!(kind, ScheduleKind::Every);
        assert_eq!(spec, "30");
    }

    #[test]
    fn in_long_duration() {
        let (kind, spec) = parse_schedule("in 2 hours", now()).unwrap();
        assert_eq!(kind, ScheduleKind::At);
        let at = DateTime::parse_from_rfc3339(&spec).unwrap();
        assert_eq!(at.with_timezone(&Utc), now() + Duration::hours(2));
    }

    #[test]
    fn every_day_at_time_derives_cron() {
        let (kind, spec) = parse_schedule("every day at 9am", now()).unwrap();
        assert_eq!(kind, ScheduleKind::Cron);
        assert_eq!(spec, "0 9 * * *");
    }

    #[test]
    fn tomorrow_at_time() {
        let (kind, spec) = parse_schedule("tomorrow at 3:30pm", now()).unwrap();
        assert_eq!(kind, ScheduleKind::At);
        let at = DateTime::parse_from_rfc3339(&spec).unwrap().with_timezone(&Utc);
        assert_eq!(at.date_naive(), now().date_naive() + Duration::days(1));
        assert_eq!(at.hour(), 15);
        assert_eq!(at.minute(), 30);
    }

    #[test]
    fn today_rolls_to_tomorrow_if_past() {
        let (_, spec) = parse_schedule("today at 9am", now()).unwrap();
        let at = DateTime::parse_from_rfc3339(&spec).unwrap().with_timezone(&Utc);
        assert!(at > now());
        assert_eq!(at.date_naive(), now().date_naive() + Duration::days(1));
    }

    #[test]
    fn bare_clock_time() {
        let (kind, _) = parse_schedule("6pm", now()).unwrap();
        assert_eq!(kind, ScheduleKind::At);
    }

    #[test]
    fn cron_form() {
        let (kind, spec) = parse_schedule("cron 0 9 * * 1-5", now()).unwrap();
        assert_eq!(kind, ScheduleKind::Cron);
        assert_eq!(spec, "0 9 * * 1-5");
    }

    #[test]
    fn unparseable_returns_none() {
        assert!(parse_schedule("asdf not a schedule !!!", now()).is_none());
    }

    #[test]
    fn next_run_of_every_advances_by_duration() {
        let n1 = next_run_of(ScheduleKind::Every, "300", now()).unwrap();
        assert_eq!(n1, now() + Duration::seconds(300));
    }

    #[test]
    fn next_run_of_monotonic_in_from() {
        let t1 = now();
        let t2 = now() + Duration::hours(1);
        let (kind, spec) = ("every", "60");
        let kind: ScheduleKind = kind.parse().unwrap();
        let n1 = next_run_of(kind, spec, t1).unwrap();
        let n2 = next_run_of(kind, spec, t2).unwrap();
        assert!(n1 <= n2);
    }

    #[test]
    fn next_run_of_cron_is_strictly_after() {
        let n = next_run_of(ScheduleKind::Cron, "0 9 * * *", now()).unwrap();
        assert!(n > now());
        assert_eq!(n.hour(), 9);
    }
}
