//! Five-field cron expressions on top of the `cron` crate.
//!
//! The crate wants a leading seconds field and numbers days of the week
//! `1..=7` from Sunday; standard expressions use `0..=7` with both 0 and 7
//! meaning Sunday. Day-of-week numbers are rewritten into explicit lists.
//!
//! Standard cron fires when *either* day field matches once both are
//! restricted; the crate requires both. Such expressions are split into a
//! day-of-month schedule and a day-of-week schedule and the earlier
//! occurrence wins. Delays are computed in the local time zone.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;

use crate::error::SchedulerError;

/// Used when a schedule has no future occurrence.
pub const FALLBACK_DELAY: Duration = Duration::from_secs(3600);

const MACROS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// A parsed subscription schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    /// One schedule, or two whose occurrences are merged.
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Parses `minute hour day-of-month month day-of-week` or an `@hourly`-style macro.
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let invalid = |message: String| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            message,
        };
        let schedules = translate(expr.trim())
            .map_err(invalid)?
            .iter()
            .map(|e| Schedule::from_str(e).map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedules,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First occurrence strictly after `from`, evaluated in `from`'s time zone.
    pub fn next_after<Z: TimeZone>(&self, from: DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&from).next())
            .min()
    }

    /// Time from now until the next occurrence in local time.
    pub fn next_delay(&self) -> Duration {
        let now = Local::now();
        match self.next_after(now) {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
            None => {
                tracing::warn!(cron = %self.expr, "schedule has no upcoming run, retrying in 1h");
                FALLBACK_DELAY
            }
        }
    }
}

/// Crate-syntax expressions whose occurrences together make up `expr`.
fn translate(expr: &str) -> Result<Vec<String>, String> {
    if expr.starts_with('@') {
        let lower = expr.to_ascii_lowercase();
        return if MACROS.contains(&lower.as_str()) {
            Ok(vec![lower])
        } else {
            Err(format!("unsupported macro {}", expr))
        };
    }
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }
    let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
    let dow = translate_day_of_week(fields[4])?;
    if is_unrestricted(dom) || is_unrestricted(fields[4]) {
        return Ok(vec![format!("0 {minute} {hour} {dom} {month} {dow}")]);
    }
    Ok(vec![
        format!("0 {minute} {hour} {dom} {month} *"),
        format!("0 {minute} {hour} * {month} {dow}"),
    ])
}

fn is_unrestricted(field: &str) -> bool {
    matches!(field, "*" | "?")
}

/// Rewrites numeric day-of-week items (`0..=7`, Sunday first) into the
/// crate's `1..=7`. Names such as `MON-FRI` are kept as written.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut days: Vec<String> = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: usize = s
                    .parse()
                    .map_err(|_| format!("bad day-of-week step '{}'", s))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (r, Some(step))
            }
            None => (item, None),
        };

        let bounds = if range == "*" {
            if step.is_none() {
                days.push("*".to_string());
                continue;
            }
            Some((0, 6))
        } else if let Some((lo, hi)) = range.split_once('-') {
            lo.parse::<u32>().ok().zip(hi.parse::<u32>().ok())
        } else {
            range
                .parse::<u32>()
                .ok()
                .map(|n| (n, if step.is_some() { 6 } else { n }))
        };

        let Some((lo, hi)) = bounds else {
            days.push(item.to_string());
            continue;
        };
        if lo > 7 || hi > 7 || lo > hi {
            return Err(format!("day-of-week '{}' out of range", item));
        }
        for d in (lo..=hi).step_by(step.unwrap_or(1)) {
            let day = if d == 7 { 1 } else { d + 1 };
            let mapped = day.to_string();
            if !days.contains(&mapped) {
                days.push(mapped);
            }
        }
    }
    Ok(days.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, FixedOffset, Timelike, Utc, Weekday};

    #[test]
    fn every_five_minutes() {
        let s = CronSchedule::parse("*/5 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 30).unwrap();
        let next = s.next_after(from).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (10, 5, 0));
        assert!(s.next_delay() <= Duration::from_secs(300));
    }

    #[test]
    fn sunday_is_zero_and_seven() {
        // 2024-01-01 is a Monday.
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for expr in ["0 12 * * 0", "0 12 * * 7"] {
            let next = CronSchedule::parse(expr).unwrap().next_after(from).unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{}", expr);
        }
        let fri = CronSchedule::parse("0 12 * * 5").unwrap().next_after(from).unwrap();
        assert_eq!(fri.weekday(), Weekday::Fri);
    }

    #[test]
    fn day_of_week_translation() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "6,7,1");
        assert_eq!(translate_day_of_week("0,7").unwrap(), "1");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "1,3,5,7");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("*/0").is_err());
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // 2024-01-01 is a Monday: the first Friday comes before the 13th.
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let s = CronSchedule::parse("0 0 13 * 5").unwrap();
        let first = s.next_after(from).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
        let mut seen = Vec::new();
        let mut t = from;
        for _ in 0..4 {
            t = s.next_after(t).unwrap();
            seen.push(t.day());
        }
        assert_eq!(seen, [5, 12, 13, 19]);
    }

    #[test]
    fn single_restricted_day_field_is_unchanged() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let dom = CronSchedule::parse("0 0 13 * *").unwrap().next_after(from).unwrap();
        assert_eq!(dom, Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap());
        let dow = CronSchedule::parse("0 0 * * 5").unwrap().next_after(from).unwrap();
        assert_eq!(dow, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn occurrences_follow_the_wall_clock_of_the_zone() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let from = plus_two.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = CronSchedule::parse("0 9 * * *").unwrap().next_after(from).unwrap();
        assert_eq!((next.hour(), next.minute()), (9, 0));
        assert_eq!(next.with_timezone(&Utc).hour(), 7);
    }

    #[test]
    fn delay_ends_on_local_time() {
        let delay = CronSchedule::parse("30 9 * * *").unwrap().next_delay();
        assert!(delay <= Duration::from_secs(24 * 3600));
        let at = Local::now() + chrono::Duration::from_std(delay).unwrap();
        assert_eq!((at.hour(), at.minute()), (9, 30));
    }

    #[test]
    fn macros_are_accepted() {
        assert!(CronSchedule::parse("@hourly").is_ok());
        assert!(CronSchedule::parse("@daily").is_ok());
        assert!(CronSchedule::parse("@every 1h").is_err());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for expr in ["", "* * * *", "61 * * * *", "* * * * * *", "not a cron"] {
            match CronSchedule::parse(expr) {
                Err(SchedulerError::InvalidCron { expr: e, .. }) => assert_eq!(e, expr),
                other => panic!("{:?} should be rejected, got {:?}", expr, other),
            }
        }
    }
}
