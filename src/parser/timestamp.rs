//! Timestamp resolution for heterogeneous forensic sources.
//!
//! Every function here is pure: the resolver never reaches for the wall
//! clock to fill a gap. When a token cannot be resolved the caller gets
//! `None` and emits the epoch-zero sentinel instead.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime, TimeZone, Utc};

/// Microseconds between the 1601 epoch (FILETIME / WebKit) and the Unix
/// epoch.
const EPOCH_1601_OFFSET_SECS: i64 = 11_644_473_600;

/// 100-ns ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;

/// Seconds between the Unix epoch and 2001-01-01 (Mac Absolute Time).
const MAC_ABSOLUTE_OFFSET_SECS: i64 = 978_307_200;

/// Textual layouts tried by [`parse_flexible`], from most to least
/// specific. Naive layouts are interpreted as UTC.
const OFFSET_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%d/%b/%Y:%H:%M:%S %z",
];

const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a timestamp token in any of the supported textual or numeric
/// conventions. Returns `None` when nothing matches.
pub fn parse_flexible(token: &str) -> Option<DateTime<Utc>> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    // RFC-3339 / ISO-8601 with offset first: the most common shape in
    // structured exports.
    if let Ok(ts) = DateTime::parse_from_rfc3339(token) {
        return Some(ts.with_timezone(&Utc));
    }

    for layout in OFFSET_LAYOUTS {
        if let Ok(ts) = DateTime::parse_from_str(token, layout) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(token, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // Packed transcript stamps are 14 bare digits; they must be tried
    // before the epoch-magnitude interpretation or they would be read
    // as a millisecond epoch.
    if let Some(ts) = parse_packed(token) {
        return Some(ts);
    }

    parse_numeric(token)
}

/// Resolve a bare numeric token using magnitude thresholds.
///
/// The discrimination is strictly magnitude-based: values in
/// `[1.16e17, 2e17)` are FILETIME ticks, above `1e15` microseconds,
/// above `1e12` milliseconds, above `1e9` seconds. A fractional token
/// is treated as Zeek-style `seconds.fraction`.
pub fn parse_numeric(token: &str) -> Option<DateTime<Utc>> {
    let token = token.trim();
    if token.contains('.') {
        return parse_zeek(token);
    }

    let value: i64 = token.parse().ok()?;
    from_numeric(value)
}

/// Magnitude-discriminated conversion of an already-parsed integer.
pub fn from_numeric(value: i64) -> Option<DateTime<Utc>> {
    if (116_444_736_000_000_000..200_000_000_000_000_000).contains(&value) {
        filetime_to_utc(value)
    } else if value >= 1_000_000_000_000_000 {
        Utc.timestamp_micros(value).single()
    } else if value >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else if value >= 1_000_000_000 {
        Utc.timestamp_opt(value, 0).single()
    } else {
        None
    }
}

/// Windows FILETIME: 100-ns ticks since 1601-01-01.
pub fn filetime_to_utc(ticks: i64) -> Option<DateTime<Utc>> {
    let unix_nanos = ticks.checked_sub(FILETIME_UNIX_DIFF)?.checked_mul(100)?;
    Some(Utc.timestamp_nanos(unix_nanos))
}

/// WebKit time (Chromium browser history): microseconds since 1601.
pub fn webkit_to_utc(micros: i64) -> Option<DateTime<Utc>> {
    let unix_secs = micros / 1_000_000 - EPOCH_1601_OFFSET_SECS;
    let sub_micros = (micros % 1_000_000) as u32;
    Utc.timestamp_opt(unix_secs, sub_micros * 1_000).single()
}

/// PRTime (Firefox places.sqlite): microseconds since the Unix epoch.
pub fn prtime_to_utc(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}

/// Mac Absolute Time (Safari history): seconds since 2001-01-01,
/// fractional part allowed.
pub fn mac_absolute_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole + MAC_ABSOLUTE_OFFSET_SECS, nanos).single()
}

/// Zeek `ts` field: Unix `seconds.fraction` with microsecond precision.
pub fn parse_zeek(token: &str) -> Option<DateTime<Utc>> {
    let (secs_str, frac_str) = match token.split_once('.') {
        Some(parts) => parts,
        None => (token, ""),
    };
    let secs: i64 = secs_str.parse().ok()?;
    let nanos = if frac_str.is_empty() {
        0
    } else {
        // Right-pad to nanoseconds; Zeek emits six fractional digits.
        let mut digits = frac_str.to_string();
        while digits.len() < 9 {
            digits.push('0');
        }
        digits.truncate(9);
        digits.parse::<u32>().ok()?
    };
    Utc.timestamp_opt(secs, nanos).single()
}

/// Packed `YYYYMMDDHHMMSS` (PowerShell transcript headers).
pub fn parse_packed(token: &str) -> Option<DateTime<Utc>> {
    if token.len() != 14 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(token, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Reconstruct a timestamp from a `Mon D HH:MM:SS` token that carries no
/// year (RFC-3164 syslog, ASL, iptables kernel lines).
///
/// The year is seeded from `now` and corrected in order:
/// 1. current month Jan/Feb with record month Nov/Dec → previous year;
/// 2. more than six months in the future relative to `now` → previous
///    year;
/// 3. when `last` is given and the result lands more than 30 days before
///    it, keep whichever of `t` and `t + 1y` is closer to `last`. This
///    streaming correction is applied last and wins conflicts.
pub fn resolve_without_year(
    token: &str,
    now: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    // Collapse the double space syslog uses for single-digit days.
    let compact = token.split_whitespace().collect::<Vec<_>>().join(" ");
    let seeded = format!("{} {}", now.year(), compact);
    let naive = NaiveDateTime::parse_from_str(&seeded, "%Y %b %d %H:%M:%S").ok()?;
    let mut ts = Utc.from_utc_datetime(&naive);

    if now.month() <= 2 && ts.month() >= 11 {
        ts = shift_years(ts, -1);
    } else if ts > now.checked_add_months(Months::new(6)).unwrap_or(now) {
        ts = shift_years(ts, -1);
    }

    if let Some(last) = last {
        if ts < last - Duration::days(30) {
            let bumped = shift_years(ts, 1);
            let keep_bumped =
                (bumped - last).num_seconds().abs() < (ts - last).num_seconds().abs();
            if keep_bumped {
                ts = bumped;
            }
        }
    }

    Some(ts)
}

fn shift_years(ts: DateTime<Utc>, delta: i32) -> DateTime<Utc> {
    // Feb 29 has no counterpart in adjacent years; clamp to Feb 28.
    ts.with_year(ts.year() + delta).unwrap_or_else(|| {
        ts.with_day(28)
            .and_then(|t| t.with_year(t.year() + delta))
            .unwrap_or(ts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_rfc3339_with_offset() {
        let ts = parse_flexible("2023-04-21T15:30:45+02:00").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 13, 30, 45));
    }

    #[test]
    fn test_rfc3339_fractional() {
        let ts = parse_flexible("2023-04-21T15:30:45.123456Z").unwrap();
        assert_eq!(ts.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_space_separated_naive_is_utc() {
        let ts = parse_flexible("2023-04-21 15:30:45").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 30, 45));
    }

    #[test]
    fn test_web_access_layout() {
        let ts = parse_flexible("21/Apr/2023:15:30:45 +0000").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 30, 45));
    }

    #[test]
    fn test_windows_locale_layout() {
        let ts = parse_flexible("4/21/2023 3:30:45 PM").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 30, 45));
    }

    #[test]
    fn test_packed_transcript_layout() {
        let ts = parse_packed("20230421153045").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 30, 45));
        assert!(parse_packed("2023042115304").is_none());
        assert!(parse_packed("2023042115304x").is_none());
    }

    #[test]
    fn test_epoch_seconds() {
        let ts = parse_numeric("1600000000").unwrap();
        assert_eq!(ts, utc(2020, 9, 13, 12, 26, 40));
    }

    #[test]
    fn test_epoch_millis() {
        let ts = parse_numeric("1600000000000").unwrap();
        assert_eq!(ts, utc(2020, 9, 13, 12, 26, 40));
    }

    #[test]
    fn test_epoch_micros() {
        let ts = parse_numeric("1600000000000000").unwrap();
        assert_eq!(ts, utc(2020, 9, 13, 12, 26, 40));
    }

    #[test]
    fn test_filetime_range() {
        // 2021-01-01T00:00:00Z expressed in 100-ns ticks since 1601.
        let ts = parse_numeric("132539328000000000").unwrap();
        assert_eq!(ts, utc(2021, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_small_numbers_are_rejected() {
        assert!(parse_numeric("12345").is_none());
    }

    #[test]
    fn test_webkit_conversion() {
        // 2021-01-01T00:00:00Z = 13 253 932 800 seconds after 1601.
        let ts = webkit_to_utc(13_253_932_800_000_000).unwrap();
        assert_eq!(ts, utc(2021, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_prtime_conversion() {
        let ts = prtime_to_utc(1_600_000_000_000_000).unwrap();
        assert_eq!(ts, utc(2020, 9, 13, 12, 26, 40));
    }

    #[test]
    fn test_mac_absolute_conversion() {
        // 2021-01-01 is 631 152 000 seconds after 2001-01-01.
        let ts = mac_absolute_to_utc(631_152_000.5).unwrap();
        assert_eq!(ts.timestamp(), utc(2021, 1, 1, 0, 0, 0).timestamp());
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_zeek_fractional() {
        let ts = parse_zeek("1682087445.123456").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 50, 45) + Duration::microseconds(123_456));
    }

    #[test]
    fn test_zeek_whole_seconds() {
        let ts = parse_zeek("1682087445.").unwrap();
        assert_eq!(ts, utc(2023, 4, 21, 15, 50, 45));
    }

    #[test]
    fn test_round_trip_through_rfc3339() {
        for token in [
            "2023-04-21T15:30:45Z",
            "2023-04-21 15:30:45.123",
            "21/Apr/2023:15:30:45 +0200",
            "1600000000",
        ] {
            let first = parse_flexible(token).unwrap();
            let second = parse_flexible(&first.to_rfc3339()).unwrap();
            assert_eq!(first, second, "round-trip failed for {token}");
        }
    }

    // ── Absent-year reconstruction ──────────────────────────────

    #[test]
    fn test_year_seeded_from_now() {
        let now = utc(2024, 6, 15, 0, 0, 0);
        let ts = resolve_without_year("Jan 01 12:00:00", now, None).unwrap();
        assert_eq!(ts, utc(2024, 1, 1, 12, 0, 0));
    }

    #[test]
    fn test_single_digit_day_double_space() {
        let now = utc(2024, 6, 15, 0, 0, 0);
        let ts = resolve_without_year("Oct  2 08:15:00", now, None).unwrap();
        assert_eq!(ts, utc(2024, 10, 2, 8, 15, 0));
    }

    #[test]
    fn test_december_record_read_in_january() {
        let now = utc(2024, 1, 10, 0, 0, 0);
        let ts = resolve_without_year("Dec 31 23:59:59", now, None).unwrap();
        assert_eq!(ts.year(), 2023);
    }

    #[test]
    fn test_far_future_record_rolls_back_a_year() {
        // Seven months ahead of "now": must belong to the previous year.
        let now = utc(2024, 1, 10, 0, 0, 0);
        let ts = resolve_without_year("Aug 15 10:00:00", now, None).unwrap();
        assert_eq!(ts.year(), 2023);
    }

    #[test]
    fn test_streaming_correction_prefers_closer_year() {
        // Stream previously saw late December of the seeded year; a
        // January record seeded to the same year jumps ~11 months back,
        // so the corrected value is January of the following year.
        let now = utc(2024, 12, 30, 0, 0, 0);
        let last = utc(2024, 12, 29, 23, 0, 0);
        let ts = resolve_without_year("Jan 02 01:00:00", now, Some(last)).unwrap();
        assert_eq!(ts, utc(2025, 1, 2, 1, 0, 0));
    }

    #[test]
    fn test_streaming_correction_keeps_small_backward_steps() {
        let now = utc(2024, 6, 15, 0, 0, 0);
        let last = utc(2024, 6, 10, 0, 0, 0);
        let ts = resolve_without_year("Jun 01 00:00:00", now, Some(last)).unwrap();
        assert_eq!(ts, utc(2024, 6, 1, 0, 0, 0));
    }

    #[test]
    fn test_streaming_correction_wins_over_future_rule() {
        // The six-month rule pushes the record to the previous year, but
        // the stream is already near the seeded year: the 30-day check
        // pulls it forward again because that lands closer to `last`.
        let now = utc(2024, 1, 10, 0, 0, 0);
        let last = utc(2024, 8, 1, 0, 0, 0);
        let ts = resolve_without_year("Aug 15 10:00:00", now, Some(last)).unwrap();
        assert_eq!(ts.year(), 2024);
    }

    #[test]
    fn test_garbage_token_is_none() {
        let now = utc(2024, 1, 10, 0, 0, 0);
        assert!(resolve_without_year("not a date", now, None).is_none());
        assert!(parse_flexible("definitely not a date").is_none());
    }
}
