//! NEM timestamp parsing and 5/30-minute grid arithmetic.
//!
//! All timestamps are naive market time (AEST, no daylight saving), which is
//! how every NemWeb file publishes them.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Length of a dispatch interval.
pub const DISPATCH_MINUTES: i64 = 5;

/// Length of a trading interval.
pub const TRADING_MINUTES: i64 = 30;

/// Hour at which a NEM market day starts.
pub const MARKET_DAY_START_HOUR: u32 = 4;

const FIELD_FORMATS: [&str; 4] = [
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timestamp field as it appears in NEM CSV files (`2024/01/15 12:30:00`).
///
/// Surrounding quotes and whitespace are ignored; a bare date parses as midnight.
pub fn parse_field(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim().trim_matches('"').trim();
    if s.is_empty() {
        return None;
    }
    for fmt in FIELD_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    ["%Y/%m/%d", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Parse a compact digit token from a NemWeb file name.
///
/// Accepts `YYYYMMDD`, `YYYYMMDDHHMM` and `YYYYMMDDHHMMSS`.
pub fn parse_compact(token: &str) -> Option<NaiveDateTime> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match token.len() {
        8 => NaiveDate::parse_from_str(token, "%Y%m%d")
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN)),
        12 => NaiveDateTime::parse_from_str(token, "%Y%m%d%H%M").ok(),
        14 => NaiveDateTime::parse_from_str(token, "%Y%m%d%H%M%S").ok(),
        _ => None,
    }
}

/// Format a timestamp the way NEM CSV files do.
pub fn format_field(ts: NaiveDateTime) -> String {
    ts.format("%Y/%m/%d %H:%M:%S").to_string()
}

fn epoch_seconds(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp()
}

/// Round up to the next multiple of `minutes` (identity on a boundary).
pub fn ceil_to(ts: NaiveDateTime, minutes: i64) -> NaiveDateTime {
    let floored = floor_to(ts, minutes);
    if floored == ts {
        ts
    } else {
        floored + Duration::minutes(minutes)
    }
}

/// Round down to the previous multiple of `minutes`.
pub fn floor_to(ts: NaiveDateTime, minutes: i64) -> NaiveDateTime {
    let step = minutes * 60;
    let secs = epoch_seconds(ts);
    let rem = secs.rem_euclid(step);
    let whole = ts - Duration::nanoseconds(i64::from(ts.and_utc().timestamp_subsec_nanos()));
    whole - Duration::seconds(rem)
}

/// The trading interval (30-minute, period-ending) a dispatch interval belongs to.
pub fn trading_interval(interval5: NaiveDateTime) -> NaiveDateTime {
    ceil_to(interval5, TRADING_MINUTES)
}

/// Start of the market day (04:00) on the given calendar date.
pub fn market_day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(MARKET_DAY_START_HOUR, 0, 0).unwrap_or(NaiveTime::MIN))
}

/// Label of an issue frame: issue time floored to 5 minutes, `YYYYMMDD HH:MM`.
pub fn frame_label(issued_at: NaiveDateTime) -> String {
    floor_to(issued_at, DISPATCH_MINUTES)
        .format("%Y%m%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parses_nem_fields() {
        assert_eq!(
            parse_field("2024/01/15 12:30:00"),
            Some(ts("2024-01-15 12:30:00"))
        );
        assert_eq!(
            parse_field("\"2024-01-15 12:30:00\""),
            Some(ts("2024-01-15 12:30:00"))
        );
        assert_eq!(parse_field("2024/01/15"), Some(ts("2024-01-15 00:00:00")));
        assert_eq!(parse_field(""), None);
        assert_eq!(parse_field("RRP"), None);
    }

    #[test]
    fn parses_compact_tokens() {
        assert_eq!(parse_compact("20240115"), Some(ts("2024-01-15 00:00:00")));
        assert_eq!(parse_compact("202401151230"), Some(ts("2024-01-15 12:30:00")));
        assert_eq!(
            parse_compact("20240115123005"),
            Some(ts("2024-01-15 12:30:05"))
        );
        assert_eq!(parse_compact("PREDISPATCHIS"), None);
        assert_eq!(parse_compact("2024011"), None);
    }

    #[test]
    fn ceil_is_identity_on_boundary() {
        assert_eq!(ceil_to(ts("2024-01-15 12:30:00"), 30), ts("2024-01-15 12:30:00"));
        assert_eq!(ceil_to(ts("2024-01-15 12:05:00"), 30), ts("2024-01-15 12:30:00"));
        assert_eq!(ceil_to(ts("2024-01-15 23:35:00"), 30), ts("2024-01-16 00:00:00"));
    }

    #[test]
    fn floor_drops_partial_interval() {
        assert_eq!(floor_to(ts("2024-01-15 12:34:59"), 5), ts("2024-01-15 12:30:00"));
        assert_eq!(floor_to(ts("2024-01-15 12:35:00"), 5), ts("2024-01-15 12:35:00"));
    }

    #[test]
    fn frame_label_floors_to_dispatch_interval() {
        assert_eq!(frame_label(ts("2024-01-15 09:03:12")), "20240115 09:00");
    }

    #[test]
    fn market_day_starts_at_four() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(market_day_start(d), ts("2024-01-15 04:00:00"));
    }
}
