// Cron Schedule (5-field, UTC)
//
// minute hour day-of-month month day-of-week
// Supports `*`, lists (`1,15`), ranges (`1-5`) and steps (`*/10`, `0-30/5`).

use crate::domain::error::{DomainError, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Upper bound for `next_after` searches
const MAX_SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(DomainError::ValidationError(format!(
                "cron expression must have 5 fields, got {}: '{}'",
                fields.len(),
                expr
            )));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7, "day-of-week")?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: fields.join(" "),
            minutes: parse_field(fields[0], 0, 59, "minute")?,
            hours: parse_field(fields[1], 0, 23, "hour")?,
            days_of_month: parse_field(fields[2], 1, 31, "day-of-month")?,
            months: parse_field(fields[3], 1, 12, "month")?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.months & bit(t.month()) != 0
            && self.day_matches(t)
            && self.hours & bit(t.hour()) != 0
            && self.minutes & bit(t.minute()) != 0
    }

    /// Classic cron: when both day fields are restricted, either may match
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.days_of_month & bit(t.day()) != 0;
        let dow = self.days_of_week & bit(t.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First fire time strictly after `after` (minute resolution)
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let limit = after + Duration::days(MAX_SEARCH_DAYS);
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        while t <= limit {
            if self.months & bit(t.month()) == 0 {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t) {
                let next_day = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
                t = Utc.from_utc_datetime(&next_day);
                continue;
            }
            if self.hours & bit(t.hour()) == 0 {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if self.minutes & bit(t.minute()) == 0 {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Whether a fire time falls in `(max(since, now - lookback), now]`.
///
/// `since` is the later of the job's creation and its last run start, so a
/// fire time already served by a run is never served twice. The lookback
/// bounds catch-up: fire times older than one scheduler window are dropped
/// rather than queued.
pub fn is_due(schedule: &CronSchedule, now_millis: i64, since_millis: i64, lookback_ms: i64) -> bool {
    let lower = since_millis.max(now_millis - lookback_ms);
    let (Some(lower), Some(now)) = (millis_to_utc(lower), millis_to_utc(now_millis)) else {
        return false;
    };
    match schedule.next_after(lower) {
        Some(fire) => fire <= now,
        None => false,
    }
}

pub fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn bit(value: u32) -> u64 {
    1u64 << value
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

fn parse_field(field: &str, min: u32, max: u32, name: &str) -> Result<u64> {
    let invalid = |detail: &str| {
        DomainError::ValidationError(format!(
            "invalid cron {} field '{}': {}",
            name, field, detail
        ))
    };

    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid("bad range start"))?;
            let b: u32 = b.parse().map_err(|_| invalid("bad range end"))?;
            (a, b)
        } else {
            let v: u32 = range.parse().map_err(|_| invalid("not a number"))?;
            // `5/15` means "from 5 to the end, every 15"
            (v, if step.is_some() { max } else { v })
        };

        if start < min || end > max || start > end {
            return Err(invalid(&format!("values must be within {}-{}", min, max)));
        }

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            mask |= bit(v);
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("* * * * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
    }

    #[test]
    fn test_next_after_daily() {
        let cron = CronSchedule::parse("30 2 * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 3, 10, 1, 0)),
            Some(at(2026, 3, 10, 2, 30))
        );
        // Strictly after
        assert_eq!(
            cron.next_after(at(2026, 3, 10, 2, 30)),
            Some(at(2026, 3, 11, 2, 30))
        );
    }

    #[test]
    fn test_next_after_steps_and_lists() {
        let cron = CronSchedule::parse("*/15 8-9 * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 1, 1, 8, 16)),
            Some(at(2026, 1, 1, 8, 30))
        );
        assert_eq!(
            cron.next_after(at(2026, 1, 1, 9, 45)),
            Some(at(2026, 1, 2, 8, 0))
        );

        let cron = CronSchedule::parse("0 0 1,15 * *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 1, 2, 0, 0)),
            Some(at(2026, 1, 15, 0, 0))
        );
    }

    #[test]
    fn test_next_after_crosses_year() {
        let cron = CronSchedule::parse("0 0 1 1 *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 6, 1, 0, 0)),
            Some(at(2027, 1, 1, 0, 0))
        );
    }

    #[test]
    fn test_day_of_week_and_sunday_alias() {
        // 2026-03-15 is a Sunday
        let cron = CronSchedule::parse("0 4 * * 7").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 3, 10, 0, 0)),
            Some(at(2026, 3, 15, 4, 0))
        );
        let weekdays = CronSchedule::parse("0 4 * * 1-5").unwrap();
        assert_eq!(
            weekdays.next_after(at(2026, 3, 14, 0, 0)),
            Some(at(2026, 3, 16, 4, 0))
        );
    }

    #[test]
    fn test_impossible_date_returns_none() {
        let cron = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(cron.next_after(at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_is_due_window() {
        let cron = CronSchedule::parse("0 3 * * *").unwrap();
        let fire = at(2026, 5, 1, 3, 0).timestamp_millis();
        let minute = 60_000;
        let created = at(2026, 4, 1, 0, 0).timestamp_millis();

        // Tick just after the fire time
        assert!(is_due(&cron, fire + 10_000, created, 2 * minute));
        // Tick before the fire time
        assert!(!is_due(&cron, fire - 10_000, created, 2 * minute));
        // Already served by a run started at the fire time
        assert!(!is_due(&cron, fire + 30_000, fire, 2 * minute));
        // Missed long ago: dropped, not caught up
        assert!(!is_due(&cron, fire + 60 * minute, created, 2 * minute));
    }

    #[test]
    fn test_is_due_ignores_fire_times_before_creation() {
        let cron = CronSchedule::parse("0 3 * * *").unwrap();
        let fire = at(2026, 5, 1, 3, 0).timestamp_millis();
        assert!(!is_due(&cron, fire + 30_000, fire + 1, 120_000));
    }
}
