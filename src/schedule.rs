//! 5-field cron expressions and DST-safe next-occurrence computation.
//!
//! Expressions follow standard crontab semantics: `minute hour day-of-month
//! month day-of-week` with `*`, lists, ranges, steps and names; day-of-week
//! accepts 0-7 with both 0 and 7 meaning Sunday; when day-of-month and
//! day-of-week are both restricted, a day matching either fires.
//!
//! The next-occurrence walk runs against the job's zone: a wall-clock time
//! erased by spring-forward fires at the first instant that exists again,
//! and an ambiguous fall-back time fires once, on its earlier occurrence.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use crate::error::Error;

/// How many local calendar days `next_after` scans before concluding the
/// pattern has no future occurrence (e.g. `0 0 30 2 *`). Ten years covers
/// Feb-29 patterns across skipped leap years.
const MAX_SEARCH_DAYS: u32 = 3_660;

/// Widest DST transition we probe across when a candidate lands in a
/// spring-forward gap, in minutes.
const MAX_GAP_MINUTES: u32 = 180;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A validated 5-field cron expression. Field values live in bitmasks;
/// evaluation never re-parses.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    /// Bit 0 = Sunday.
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse a 5-field expression. Rejections carry a human-readable reason;
    /// parsing is separate from evaluation so a bad expression is caught at
    /// load time.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let invalid = |reason: String| Error::InvalidCron {
            expr: expr.to_string(),
            reason,
        };
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, None)
            .map_err(|e| invalid(format!("minute field: {e}")))?;
        let hours = parse_field(fields[1], 0, 23, None)
            .map_err(|e| invalid(format!("hour field: {e}")))?;
        let days_of_month = parse_field(fields[2], 1, 31, None)
            .map_err(|e| invalid(format!("day-of-month field: {e}")))?;
        let months = parse_field(fields[3], 1, 12, Some((&MONTH_NAMES, 1)))
            .map_err(|e| invalid(format!("month field: {e}")))?;
        let mut days_of_week = parse_field(fields[4], 0, 7, Some((&DAY_NAMES, 0)))
            .map_err(|e| invalid(format!("day-of-week field: {e}")))?;
        // Both 0 and 7 are Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            source: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            // Vixie semantics: a field counts as restricted unless it starts
            // with `*`.
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// The normalized expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Smallest UTC instant strictly greater than `after` whose projection
    /// into `tz` matches the pattern, or `None` when no future occurrence
    /// exists within the search horizon. Never panics.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        // First candidate is the next whole minute after `after`; cron fires
        // on minute boundaries only.
        let floor = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local);
        let start = floor + Duration::minutes(1);

        let mut date = start.date();
        for day in 0..MAX_SEARCH_DAYS {
            if self.day_matches(date) {
                // Candidates earlier in the local day than the starting
                // wall-clock are in the past — or, on a fall-back day, would
                // re-fire the repeated hour. Skipping them keeps one fire per
                // local day.
                let not_before = (day == 0).then(|| start.time());
                if let Some(hit) = self.scan_day(date, not_before, after, tz) {
                    return Some(hit);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// Vixie day semantics: when both day-of-month and day-of-week are
    /// restricted, a day matching either fires; otherwise both must match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom_hit = self.days_of_month & (1 << date.day()) != 0;
        let dow_hit = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom_hit || dow_hit
        } else {
            dom_hit && dow_hit
        }
    }

    /// Minimal valid UTC instant among the day's matching wall-clock slots.
    fn scan_day(
        &self,
        date: NaiveDate,
        not_before: Option<NaiveTime>,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let mut best: Option<DateTime<Utc>> = None;
        for hour in 0..24u32 {
            if self.hours & (1 << hour) == 0 {
                continue;
            }
            for minute in 0..60u32 {
                if self.minutes & (1 << minute) == 0 {
                    continue;
                }
                let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                if not_before.is_some_and(|from| time < from) {
                    continue;
                }
                if let Some(utc) = resolve_local(date.and_time(time), after, tz) {
                    best = Some(best.map_or(utc, |b| b.min(utc)));
                }
            }
        }
        best
    }
}

/// Parse one crontab field into a bitmask.
///
/// Grammar per comma-separated term: `*`, `value`, `lo-hi`, optionally
/// followed by `/step`; a stepped single value runs to the field maximum.
/// `names` supplies three-letter aliases and the ordinal of the first one.
fn parse_field(
    text: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<u64, String> {
    let mut mask = 0u64;
    for term in text.split(',') {
        if term.is_empty() {
            return Err("empty list entry".to_string());
        }
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step value '{step}'"))?;
                if step == 0 {
                    return Err("step must be >= 1".to_string());
                }
                (range, Some(step))
            }
            None => (term, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                field_value(lo, names)?,
                field_value(hi, names)?,
            )
        } else {
            let value = field_value(range, names)?;
            // "N/step" means N through the field maximum.
            match step {
                Some(_) => (value, max),
                None => (value, value),
            }
        };

        if lo < min || hi > max {
            return Err(format!("value out of range {min}-{max}: '{term}'"));
        }
        if lo > hi {
            return Err(format!("inverted range '{term}'"));
        }

        let step = step.unwrap_or(1);
        let mut value = lo;
        while value <= hi {
            mask |= 1 << value;
            value += step;
        }
    }
    Ok(mask)
}

fn field_value(token: &str, names: Option<(&[&str], u32)>) -> Result<u32, String> {
    if let Ok(value) = token.parse::<u32>() {
        return Ok(value);
    }
    if let Some((names, base)) = names {
        let upper = token.to_ascii_uppercase();
        if let Some(index) = names.iter().position(|name| *name == upper) {
            return Ok(index as u32 + base);
        }
    }
    Err(format!("unrecognized value '{token}'"))
}

/// Project a local wall-clock candidate onto the UTC timeline.
///
/// - unambiguous → that instant;
/// - ambiguous (fall-back) → the earlier occurrence, or the later one only
///   when the earlier is not strictly after `after`;
/// - nonexistent (spring-forward) → the first local instant that exists
///   again after the gap.
fn resolve_local(naive: NaiveDateTime, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => {
            let utc = dt.with_timezone(&Utc);
            (utc > after).then_some(utc)
        }
        LocalResult::Ambiguous(earlier, later) => {
            let utc = earlier.with_timezone(&Utc);
            if utc > after {
                return Some(utc);
            }
            let utc = later.with_timezone(&Utc);
            (utc > after).then_some(utc)
        }
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..MAX_GAP_MINUTES {
                probe += Duration::minutes(1);
                let resolved = match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => dt,
                    LocalResult::Ambiguous(earlier, _) => earlier,
                    LocalResult::None => continue,
                };
                let utc = resolved.with_timezone(&Utc);
                return (utc > after).then_some(utc);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn parses_standard_forms() {
        for expr in [
            "* * * * *",
            "30 2 * * *",
            "*/15 0-6 1,15 * *",
            "0 9 * * 1-5",
            "5 4 * 3 *",
            "0 12 * JAN,JUL *",
            "0 8 * * MON-FRI",
            "20/10 * * * *",
        ] {
            assert!(CronExpr::parse(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = CronExpr::parse("not a cron").unwrap_err();
        assert!(err.to_string().contains("expected 5 fields"));

        let err = CronExpr::parse("0 0 * * * *").unwrap_err();
        assert!(err.to_string().contains("got 6"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("* 25 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("* * 32 * *").is_err());
        assert!(CronExpr::parse("* * * 13 *").is_err());
        assert!(CronExpr::parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_malformed_terms() {
        assert!(CronExpr::parse("*/0 * * * *").is_err(), "zero step");
        assert!(CronExpr::parse("30-10 * * * *").is_err(), "inverted range");
        assert!(CronExpr::parse("a * * * *").is_err(), "garbage token");
        assert!(CronExpr::parse("1,,2 * * * *").is_err(), "empty list entry");
        assert!(CronExpr::parse("* * * BOB *").is_err(), "unknown name");
    }

    #[test]
    fn diagnostics_name_the_field() {
        let err = CronExpr::parse("61 * * * *").unwrap_err().to_string();
        assert!(err.contains("minute field"), "{err}");
        let err = CronExpr::parse("* * * * 9").unwrap_err().to_string();
        assert!(err.contains("day-of-week field"), "{err}");
    }

    #[test]
    fn source_is_normalized() {
        let expr = CronExpr::parse("  30   2 * *   * ").unwrap();
        assert_eq!(expr.source(), "30 2 * * *");
    }

    #[test]
    fn sunday_is_both_zero_and_seven() {
        // 2024-06-02 is a Sunday.
        for field in ["0", "7", "SUN"] {
            let expr = CronExpr::parse(&format!("0 9 * * {field}")).unwrap();
            let next = expr.next_after(utc(2024, 6, 1, 0, 0, 0), Tz::UTC).unwrap();
            assert_eq!(next, utc(2024, 6, 2, 9, 0, 0), "dow field {field}");
        }
    }

    // ── plain evaluation ──────────────────────────────────────────────────────

    #[test]
    fn next_is_strictly_after_input() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let at = utc(2024, 6, 1, 12, 30, 0);
        let next = expr.next_after(at, Tz::UTC).unwrap();
        assert!(next > at);
        assert_eq!(next, utc(2024, 6, 1, 12, 31, 0));
    }

    #[test]
    fn mid_minute_input_rounds_up() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let next = expr.next_after(utc(2024, 6, 1, 12, 30, 45), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 1, 12, 31, 0));
    }

    #[test]
    fn daily_schedule_advances_a_day_once_passed() {
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        let next = expr.next_after(utc(2024, 6, 1, 9, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 2, 8, 0, 0));
    }

    #[test]
    fn weekday_schedule_skips_weekend() {
        // 2024-06-01 is a Saturday; "0 9 * * 1-5" next fires Monday the 3rd.
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        let next = expr.next_after(utc(2024, 6, 1, 0, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 3, 9, 0, 0));
    }

    #[test]
    fn steps_and_lists_combine() {
        let expr = CronExpr::parse("10,40 */6 * * *").unwrap();
        let mut at = utc(2024, 6, 1, 0, 0, 0);
        let mut hits = Vec::new();
        for _ in 0..4 {
            at = expr.next_after(at, Tz::UTC).unwrap();
            hits.push(at);
        }
        assert_eq!(
            hits,
            vec![
                utc(2024, 6, 1, 0, 10, 0),
                utc(2024, 6, 1, 0, 40, 0),
                utc(2024, 6, 1, 6, 10, 0),
                utc(2024, 6, 1, 6, 40, 0),
            ]
        );
    }

    #[test]
    fn both_day_fields_restricted_match_either() {
        // The 15th (a Saturday in June 2024) OR any Monday.
        let expr = CronExpr::parse("0 0 15 * 1").unwrap();
        let next = expr.next_after(utc(2024, 6, 10, 12, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 0, 0, 0));
        // And from the 15th, the following Monday (the 17th) matches next.
        let next = expr.next_after(next, Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 17, 0, 0, 0));
    }

    #[test]
    fn star_day_of_month_defers_to_day_of_week() {
        // dom unrestricted: only the dow constraint applies.
        let expr = CronExpr::parse("0 0 * * 1").unwrap();
        let next = expr.next_after(utc(2024, 6, 10, 12, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 17, 0, 0, 0));
    }

    #[test]
    fn impossible_date_returns_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(expr.next_after(utc(2024, 1, 1, 0, 0, 0), Tz::UTC), None);
    }

    #[test]
    fn leap_day_found_across_years() {
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        let next = expr.next_after(utc(2025, 3, 1, 0, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0, 0));
    }

    // ── zone projection ───────────────────────────────────────────────────────

    #[test]
    fn wall_clock_is_evaluated_in_the_given_zone() {
        // 08:00 Tokyo == 23:00 UTC the previous day.
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        let next = expr
            .next_after(utc(2024, 6, 1, 12, 0, 0), Tz::Asia__Tokyo)
            .unwrap();
        assert_eq!(next, utc(2024, 6, 1, 23, 0, 0));
    }

    // ── DST transitions (America/New_York: 2024-03-10 spring forward,
    //    2024-11-03 fall back) ─────────────────────────────────────────────────

    #[test]
    fn spring_forward_gap_fires_at_first_existing_instant() {
        // 02:30 local does not exist on 2024-03-10; the clock jumps from
        // 02:00 EST to 03:00 EDT (07:00Z). The job fires then, not a day late.
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        let next = expr
            .next_after(utc(2024, 3, 10, 6, 0, 0), Tz::America__New_York)
            .unwrap();
        assert_eq!(next, utc(2024, 3, 10, 7, 0, 0));
    }

    #[test]
    fn spring_forward_does_not_refire_after_the_gap() {
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        let fired = utc(2024, 3, 10, 7, 0, 0);
        let next = expr.next_after(fired, Tz::America__New_York).unwrap();
        // Next occurrence is the ordinary 02:30 EDT on the 11th (06:30Z).
        assert_eq!(next, utc(2024, 3, 11, 6, 30, 0));
    }

    #[test]
    fn fall_back_ambiguity_fires_on_earlier_occurrence() {
        // 01:30 local happens twice on 2024-11-03: 01:30 EDT (05:30Z) and
        // 01:30 EST (06:30Z). The earlier occurrence wins.
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        let next = expr
            .next_after(utc(2024, 11, 3, 4, 0, 0), Tz::America__New_York)
            .unwrap();
        assert_eq!(next, utc(2024, 11, 3, 5, 30, 0));
    }

    #[test]
    fn fall_back_fires_once_per_day() {
        // Having fired at 01:30 EDT, the repeated 01:30 EST an hour later must
        // not fire again; the next occurrence is the following day.
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        let fired = utc(2024, 11, 3, 5, 30, 0);
        let next = expr.next_after(fired, Tz::America__New_York).unwrap();
        assert_eq!(next, utc(2024, 11, 4, 6, 30, 0));
    }

    #[test]
    fn fall_back_late_start_still_fires_in_repeated_hour() {
        // Host comes up at 01:10 EST (06:10Z), after the EDT pass of 01:30 has
        // gone by unobserved. The wall clock will still read 01:30 once more.
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        let next = expr
            .next_after(utc(2024, 11, 3, 6, 10, 0), Tz::America__New_York)
            .unwrap();
        assert_eq!(next, utc(2024, 11, 3, 6, 30, 0));
    }

    #[test]
    fn sequence_is_strictly_increasing_across_transitions() {
        let expr = CronExpr::parse("*/30 * * * *").unwrap();
        let mut at = utc(2024, 3, 9, 22, 0, 0);
        for _ in 0..200 {
            let next = expr.next_after(at, Tz::America__New_York).unwrap();
            assert!(next > at, "{next} must be after {at}");
            at = next;
        }
        // The walk has crossed the spring-forward boundary.
        assert!(at > utc(2024, 3, 10, 7, 0, 0));
    }
}
