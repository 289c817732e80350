//! Recorder timestamp formats.
//!
//! Every parser returns recorder wall-clock time as a `NaiveDateTime`; no
//! vendor export carries a usable zone, and the analysis window is entered
//! in the same wall-clock terms.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

/// Largest serial accepted (31 Dec 9999).
const MAX_SERIAL_DAYS: f64 = 2_958_465.0;
const MS_PER_DAY: f64 = 86_400_000.0;

lazy_static! {
    static ref DMY_DASH_YY: Regex =
        Regex::new(r"^\s*(\d{2})-(\d{2})-(\d{2})\s+(\d{2}):(\d{2}):(\d{2})\s*$").unwrap();
    static ref DMY_FLEXIBLE: Regex =
        Regex::new(r"^\s*(\d{2})[/-](\d{2})[/-](\d{2,4})\s*(\d{1,2}):(\d{2})(?::(\d{2}))?(?:\.\d+)?\s*$")
            .unwrap();
    static ref DMY_SLASH_FULL: Regex =
        Regex::new(r"^(\d{2})/(\d{2})/(\d{4})\s+(\d{2}):(\d{2}):(\d{2})$").unwrap();
}

fn build(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(h, m, s)
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

/// Spreadsheet date serial (days since 1899-12-30, fractional part is the
/// time of day), rounded to the millisecond.
pub fn from_spreadsheet_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > MAX_SERIAL_DAYS {
        return None;
    }
    let epoch = build(1899, 12, 30, 0, 0, 0)?;
    let ms = (serial * MS_PER_DAY).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(ms))
}

/// `DD-MM-YY HH:MM:SS`, two-digit years pivoting at 50.
pub fn parse_dmy_dash_yy(text: &str) -> Option<NaiveDateTime> {
    let caps = DMY_DASH_YY.captures(text)?;
    let yy = capture_u32(&caps, 3)? as i32;
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
    build(
        year,
        capture_u32(&caps, 2)?,
        capture_u32(&caps, 1)?,
        capture_u32(&caps, 4)?,
        capture_u32(&caps, 5)?,
        capture_u32(&caps, 6)?,
    )
}

/// `DD/MM/YY[YY] H:MM[:SS]` with `/` or `-` separators; two-digit years are
/// taken as 20YY.
pub fn parse_dmy_flexible(text: &str) -> Option<NaiveDateTime> {
    let caps = DMY_FLEXIBLE.captures(text)?;
    let mut year = capture_u32(&caps, 3)? as i32;
    if year < 100 {
        year += 2000;
    }
    let seconds = match caps.get(6) {
        Some(s) => s.as_str().parse().ok()?,
        None => 0,
    };
    build(
        year,
        capture_u32(&caps, 2)?,
        capture_u32(&caps, 1)?,
        capture_u32(&caps, 4)?,
        capture_u32(&caps, 5)?,
        seconds,
    )
}

/// Exact `DD/MM/YYYY HH:MM:SS`.
pub fn parse_dmy_slash_full(text: &str) -> Option<NaiveDateTime> {
    let caps = DMY_SLASH_FULL.captures(text.trim())?;
    build(
        capture_u32(&caps, 3)? as i32,
        capture_u32(&caps, 2)?,
        capture_u32(&caps, 1)?,
        capture_u32(&caps, 4)?,
        capture_u32(&caps, 5)?,
        capture_u32(&caps, 6)?,
    )
}

/// ISO-like strings. An explicit offset is dropped and the written wall
/// time kept.
pub fn parse_iso_like(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ];
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    let without_zulu = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(without_zulu, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(without_zulu, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        build(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn serial_epoch_and_time_of_day() {
        assert_eq!(from_spreadsheet_serial(0.0), Some(dt(1899, 12, 30, 0, 0, 0)));
        // 46041.5 -> 2026-01-19 12:00:00
        assert_eq!(
            from_spreadsheet_serial(46041.5),
            Some(dt(2026, 1, 19, 12, 0, 0))
        );
        assert_eq!(from_spreadsheet_serial(f64::NAN), None);
        assert_eq!(from_spreadsheet_serial(-1.0), None);
    }

    #[test]
    fn serial_rounds_to_millisecond() {
        // 10:11:01 expressed with floating-point noise
        let serial = 46041.0 + (10.0 * 3600.0 + 11.0 * 60.0 + 1.0) / 86_400.0 + 1e-10;
        assert_eq!(
            from_spreadsheet_serial(serial),
            Some(dt(2026, 1, 19, 10, 11, 1))
        );
    }

    #[test]
    fn dash_two_digit_year_pivots_at_fifty() {
        assert_eq!(
            parse_dmy_dash_yy("19-01-26 10:11:01"),
            Some(dt(2026, 1, 19, 10, 11, 1))
        );
        assert_eq!(
            parse_dmy_dash_yy("19-01-98 10:11:01"),
            Some(dt(1998, 1, 19, 10, 11, 1))
        );
        assert_eq!(parse_dmy_dash_yy("2026-01-19 10:11:01"), None);
    }

    #[test]
    fn flexible_accepts_missing_seconds_and_short_year() {
        assert_eq!(
            parse_dmy_flexible("19/01/26 9:05"),
            Some(dt(2026, 1, 19, 9, 5, 0))
        );
        assert_eq!(
            parse_dmy_flexible("19-01-2026 10:11:01"),
            Some(dt(2026, 1, 19, 10, 11, 1))
        );
        assert_eq!(parse_dmy_flexible("31/02/2026 10:11:01"), None);
        assert_eq!(parse_dmy_flexible("2026-01-19 10:11:01"), None);
        assert_eq!(parse_dmy_flexible("2026/01/19 10:11"), None);
    }

    #[test]
    fn slash_full_is_exact() {
        assert_eq!(
            parse_dmy_slash_full(" 19/01/2026 10:11:01 "),
            Some(dt(2026, 1, 19, 10, 11, 1))
        );
        assert_eq!(parse_dmy_slash_full("19/01/26 10:11:01"), None);
    }

    #[test]
    fn iso_like_variants() {
        let expected = Some(dt(2026, 1, 19, 10, 11, 1));
        assert_eq!(parse_iso_like("2026-01-19T10:11:01"), expected);
        assert_eq!(parse_iso_like("2026-01-19 10:11:01.000"), expected);
        assert_eq!(parse_iso_like("2026-01-19T10:11:01+05:30"), expected);
        assert_eq!(parse_iso_like("2026-01-19T10:11:01Z"), expected);
        assert_eq!(
            parse_iso_like("2026-01-19T10:11"),
            Some(dt(2026, 1, 19, 10, 11, 0))
        );
        assert_eq!(parse_iso_like("not a date"), None);
    }
}
