//! Natural-language date filters
//!
//! Resolves temporal phrases in a query ("yesterday", "last week", "in
//! January", explicit dates) to an inclusive UTC second range. Resolution
//! happens in the user's local time (client tz offset), then converts to UTC
//! so the range lines up with stored event times.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

const MONTHS: [(&str, u32); 12] = [
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

fn iso_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2})\s*(?:to|until|through|-)\s*(\d{4}-\d{2}-\d{2})").unwrap()
    })
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap())
}

fn month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\b(?:\s+(\d{1,2})\b)?(?:,?\s+(\d{4})\b)?",
        )
        .unwrap()
    })
}

/// Inclusive UTC second range resolved from the query text.
///
/// `tz_offset_minutes` is the client's offset from UTC (east positive), used
/// so "yesterday" means the user's yesterday.
pub fn parse_date_range(
    text: &str,
    tz_offset_minutes: i32,
    now: DateTime<Utc>,
) -> Option<(i64, i64)> {
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)?;
    let local_now = now.with_timezone(&offset);
    let today = local_now.date_naive();
    let lower = text.to_lowercase();

    // Explicit ranges and dates trump relative phrases
    if let Some(caps) = iso_range_re().captures(text) {
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
        return days_to_range(start, end, offset);
    }
    if let Some(caps) = iso_date_re().captures(text) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return days_to_range(date, date, offset);
    }

    if lower.contains("yesterday") {
        let date = today - Duration::days(1);
        return days_to_range(date, date, offset);
    }
    if lower.contains("today") {
        return days_to_range(today, today, offset);
    }

    if lower.contains("last week") {
        let this_monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let start = this_monday - Duration::days(7);
        return days_to_range(start, start + Duration::days(6), offset);
    }
    if lower.contains("this week") {
        let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        return days_to_range(start, today, offset);
    }

    if lower.contains("last month") {
        let (year, month) = if today.month() == 1 {
            (today.year() - 1, 12)
        } else {
            (today.year(), today.month() - 1)
        };
        return month_range(year, month, offset);
    }
    if lower.contains("this month") {
        let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
        return days_to_range(start, today, offset);
    }

    // Named month, optionally with a day and/or year: "in January",
    // "February 14", "March 2025". Without a year the most recent
    // non-future occurrence is meant.
    if let Some(caps) = month_re().captures(&lower) {
        let month = MONTHS
            .iter()
            .find(|(name, _)| *name == &caps[1])
            .map(|(_, m)| *m)?;
        let day: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let year: Option<i32> = caps.get(3).and_then(|m| m.as_str().parse().ok());

        let year = year.unwrap_or_else(|| {
            if month > today.month() || (month == today.month() && day.map_or(false, |d| d > today.day())) {
                today.year() - 1
            } else {
                today.year()
            }
        });

        return match day {
            Some(day) => {
                let date = NaiveDate::from_ymd_opt(year, month, day)?;
                days_to_range(date, date, offset)
            }
            None => month_range(year, month, offset),
        };
    }

    None
}

fn month_range(year: i32, month: u32, offset: FixedOffset) -> Option<(i64, i64)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    } - Duration::days(1);
    days_to_range(start, end, offset)
}

fn days_to_range(start: NaiveDate, end: NaiveDate, offset: FixedOffset) -> Option<(i64, i64)> {
    let start_ts = start
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(offset)
        .single()?
        .timestamp();
    let end_ts = end
        .and_hms_opt(23, 59, 59)?
        .and_local_timezone(offset)
        .single()?
        .timestamp();
    Some((start_ts, end_ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // 2026-02-02T12:00:00Z, a Monday
        Utc.timestamp_opt(1_770_033_600, 0).unwrap()
    }

    #[test]
    fn test_yesterday_local_time() {
        // UTC+2: local day boundaries shift two hours earlier in UTC
        let (start, end) = parse_date_range("what did I eat yesterday?", 120, now()).unwrap();
        let expected_start = Utc
            .with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
            .unwrap()
            .timestamp()
            - 7200;
        assert_eq!(start, expected_start);
        assert_eq!(end - start, 86_399);
    }

    #[test]
    fn test_explicit_iso_date() {
        let (start, end) = parse_date_range("photos from 2025-12-25", 0, now()).unwrap();
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2025, 12, 25, 0, 0, 0).unwrap().timestamp()
        );
        assert_eq!(end - start, 86_399);
    }

    #[test]
    fn test_iso_range() {
        let (start, end) =
            parse_date_range("between 2025-06-01 to 2025-06-07", 0, now()).unwrap();
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp()
        );
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2025, 6, 7, 23, 59, 59).unwrap().timestamp()
        );
    }

    #[test]
    fn test_last_week_is_monday_aligned() {
        // now() is Monday 2026-02-02; last week is Jan 26 through Feb 1
        let (start, end) = parse_date_range("summarize last week", 0, now()).unwrap();
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2026, 1, 26, 0, 0, 0).unwrap().timestamp()
        );
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2026, 2, 1, 23, 59, 59).unwrap().timestamp()
        );
    }

    #[test]
    fn test_named_month_resolves_backwards() {
        // Asked in February 2026, "in December" means December 2025
        let (start, _) = parse_date_range("what happened in December?", 0, now()).unwrap();
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_month_with_day_and_year() {
        let (start, end) = parse_date_range("dinner on July 4, 2025", 0, now()).unwrap();
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2025, 7, 4, 0, 0, 0).unwrap().timestamp()
        );
        assert_eq!(end - start, 86_399);
    }

    #[test]
    fn test_no_temporal_phrase() {
        assert!(parse_date_range("where did I park my car", 0, now()).is_none());
    }
}
