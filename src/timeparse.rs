//! Instant parsing and formatting.
//!
//! All instants are carried in-memory as UTC epoch milliseconds
//! (`EpochMs`). The two display formats used across CSV/JSON/Markdown
//! are ISO-8601 (`2024-01-01T10:00:00.000Z`) and the timeline form
//! (`2024-01-01 10:00:00.000`).

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// UTC instant, millisecond precision.
pub type EpochMs = i64;

const DAY_MS: i64 = 86_400_000;

/// Formats an instant as `YYYY-MM-DD HH:mm:ss.SSS` (UTC).
pub fn fmt_ts(ms: EpochMs) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("<bad ts {ms}>"),
    }
}

/// Formats an instant as ISO-8601 with a trailing `Z`.
pub fn fmt_iso(ms: EpochMs) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => format!("<bad ts {ms}>"),
    }
}

/// Minute bucket key, `YYYY-MM-DD HH:mm` (UTC).
pub fn minute_key(ms: EpochMs) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("<bad ts {ms}>"),
    }
}

/// Start-of-minute instant for a given instant.
pub fn minute_floor(ms: EpochMs) -> EpochMs {
    ms - ms.rem_euclid(60_000)
}

/// Parses an ISO-8601 instant (with `Z` or a numeric offset) into epoch
/// milliseconds. Also accepts the timeline form with a space separator.
pub fn parse_iso(s: &str) -> Option<EpochMs> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    // `2024-01-01 10:00:00.000 +08:00` — the ping-prefix local form.
    for fmt in ["%Y-%m-%d %H:%M:%S%.3f %z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc).timestamp_millis());
        }
    }
    // Naive timeline form, interpreted as UTC.
    for fmt in ["%Y-%m-%d %H:%M:%S%.3f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

/// Validates and parses a `±HH:MM` timezone offset into minutes.
/// Magnitude is capped at 14 hours.
pub fn parse_tz_offset(s: &str) -> Option<i32> {
    static TZ_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^([+-])(\d{2}):(\d{2})$").expect("tz offset regex"));
    let caps = TZ_RE.captures(s)?;
    let sign = if &caps[1] == "-" { -1 } else { 1 };
    let hours: i32 = caps[2].parse().ok()?;
    let minutes: i32 = caps[3].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    let total = hours * 60 + minutes;
    if total > 14 * 60 {
        return None;
    }
    Some(sign * total)
}

/// One parsed logcat threadtime line:
/// `MM-DD HH:mm:ss.SSS PID TID LEVEL TAG: message`.
#[derive(Debug, Clone)]
pub struct ThreadtimeLine {
    pub ts: EpochMs,
    pub pid: u32,
    pub tid: u32,
    pub level: char,
    pub tag: String,
    pub message: String,
}

/// Year anchor for threadtime lines, which carry no year of their own.
///
/// Anchored on the capture manifest's start instant when available;
/// a resolved instant landing more than one day past the capture end
/// rolls the year back by one (month-wraparound guard).
#[derive(Debug, Clone, Copy)]
pub struct YearAnchor {
    year: i32,
    capture_end: Option<EpochMs>,
}

impl YearAnchor {
    pub fn from_year(year: i32) -> Self {
        YearAnchor {
            year,
            capture_end: None,
        }
    }

    /// Uses the current wall-clock year. Fallback when no manifest is
    /// present in the capture directory.
    pub fn current() -> Self {
        YearAnchor::from_year(Utc::now().year())
    }

    pub fn from_capture_range(start: EpochMs, end: Option<EpochMs>) -> Self {
        let year = Utc
            .timestamp_millis_opt(start)
            .single()
            .map(|dt| dt.year())
            .unwrap_or_else(|| Utc::now().year());
        YearAnchor {
            year,
            capture_end: end,
        }
    }

    fn assemble(
        &self,
        year: i32,
        month: u32,
        day: u32,
        h: u32,
        m: u32,
        s: u32,
        milli: u32,
    ) -> Option<EpochMs> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let dt = date.and_hms_milli_opt(h, m, s, milli)?;
        Some(dt.and_utc().timestamp_millis())
    }

    /// Resolves a month/day/time tuple into an absolute instant.
    pub fn resolve(
        &self,
        month: u32,
        day: u32,
        h: u32,
        m: u32,
        s: u32,
        milli: u32,
    ) -> Option<EpochMs> {
        let ts = self.assemble(self.year, month, day, h, m, s, milli)?;
        if let Some(end) = self.capture_end {
            if ts > end + DAY_MS {
                // A January line read under a December anchor year.
                return self.assemble(self.year - 1, month, day, h, m, s, milli);
            }
        }
        Some(ts)
    }
}

static THREADTIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{2})-(\d{2})\s+(\d{2}):(\d{2}):(\d{2})\.(\d{3})\s+(\d+)\s+(\d+)\s+([VDIWEFA])\s+(.*?)\s*:\s(.*)$",
    )
    .expect("threadtime regex")
});

/// Parses one threadtime line. Unparseable lines yield `None` and are
/// silently skipped by callers.
pub fn parse_threadtime(line: &str, anchor: &YearAnchor) -> Option<ThreadtimeLine> {
    let caps = THREADTIME_RE.captures(line)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let h: u32 = caps[3].parse().ok()?;
    let m: u32 = caps[4].parse().ok()?;
    let s: u32 = caps[5].parse().ok()?;
    let milli: u32 = caps[6].parse().ok()?;
    let ts = anchor.resolve(month, day, h, m, s, milli)?;
    Some(ThreadtimeLine {
        ts,
        pid: caps[7].parse().ok()?,
        tid: caps[8].parse().ok()?,
        level: caps[9].chars().next()?,
        tag: caps[10].to_string(),
        message: caps[11].to_string(),
    })
}

/// Parses an Android relative duration like `+1h2m3s450ms` or `+5s30ms`
/// into milliseconds. The whole string must consist of value/unit
/// tokens; anything else yields `None`.
pub fn parse_android_duration(s: &str) -> Option<i64> {
    static DUR_TOKEN_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+)(ms|d|h|m|s)").expect("duration token regex"));
    let body = s.trim().trim_start_matches('+');
    let mut total: i64 = 0;
    let mut matched_len = 0;
    for caps in DUR_TOKEN_RE.captures_iter(body) {
        let value: i64 = caps[1].parse().ok()?;
        total += match &caps[2] {
            "d" => value * DAY_MS,
            "h" => value * 3_600_000,
            "m" => value * 60_000,
            "s" => value * 1_000,
            "ms" => value,
            _ => return None,
        };
        matched_len += caps[0].len();
    }
    if matched_len == 0 || matched_len != body.len() {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threadtime_roundtrip() {
        let anchor = YearAnchor::from_year(2024);
        let line = "01-01 10:00:00.000  1234  5678 I LimeLog: Launched new game session";
        let parsed = parse_threadtime(line, &anchor).unwrap();
        assert_eq!(parsed.pid, 1234);
        assert_eq!(parsed.tid, 5678);
        assert_eq!(parsed.level, 'I');
        assert_eq!(parsed.tag, "LimeLog");
        assert_eq!(parsed.message, "Launched new game session");
        assert_eq!(fmt_ts(parsed.ts), "2024-01-01 10:00:00.000");
    }

    #[test]
    fn threadtime_rejects_garbage() {
        let anchor = YearAnchor::from_year(2024);
        assert!(parse_threadtime("--------- beginning of main", &anchor).is_none());
        assert!(parse_threadtime("", &anchor).is_none());
    }

    #[test]
    fn year_rollback_on_month_wraparound() {
        // Capture ran across New Year's Eve; anchor year is the start year + 1
        // scenario: manifest started in December 2023, line is from January.
        let start = parse_iso("2023-12-31T23:00:00.000Z").unwrap();
        let end = parse_iso("2024-01-01T01:00:00.000Z").unwrap();
        let anchor = YearAnchor::from_capture_range(start, Some(end));
        // A December line resolves in the anchor year.
        let dec = anchor.resolve(12, 31, 23, 30, 0, 0).unwrap();
        assert_eq!(fmt_ts(dec), "2023-12-31 23:30:00.000");
        // A June line would land far past capture end under 2023? No —
        // 2023-06 is before end. The rollback only fires when the resolved
        // instant overshoots capture end by more than a day.
        let anchor2 = YearAnchor::from_capture_range(end, Some(end));
        let jan = anchor2.resolve(1, 1, 0, 30, 0, 0).unwrap();
        assert_eq!(fmt_ts(jan), "2024-01-01 00:30:00.000");
        let dec2 = anchor2.resolve(12, 31, 23, 30, 0, 0).unwrap();
        assert_eq!(fmt_ts(dec2), "2023-12-31 23:30:00.000");
    }

    #[test]
    fn tz_offset_validation() {
        assert_eq!(parse_tz_offset("+08:00"), Some(480));
        assert_eq!(parse_tz_offset("-05:30"), Some(-330));
        assert_eq!(parse_tz_offset("+14:00"), Some(840));
        assert_eq!(parse_tz_offset("+14:01"), None);
        assert_eq!(parse_tz_offset("8:00"), None);
        assert_eq!(parse_tz_offset("+0800"), None);
        assert_eq!(parse_tz_offset("+08:60"), None);
    }

    #[test]
    fn android_duration_parsing() {
        assert_eq!(parse_android_duration("+5s30ms"), Some(5_030));
        assert_eq!(parse_android_duration("+1h2m3s450ms"), Some(3_723_450));
        assert_eq!(parse_android_duration("+742ms"), Some(742));
        assert_eq!(parse_android_duration("+2m"), Some(120_000));
        assert_eq!(parse_android_duration("soon"), None);
    }

    #[test]
    fn iso_parse_accepts_offsets() {
        let a = parse_iso("2024-01-01T10:00:00.000Z").unwrap();
        let b = parse_iso("2024-01-01 18:00:00.000 +08:00").unwrap();
        assert_eq!(a, b);
    }
}
