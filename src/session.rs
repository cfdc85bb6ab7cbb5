//! Stream-session detection from streaming-client log markers.
//!
//! A window opens on any start marker, is extended by activity, and
//! closes on an end marker (or goes stale after 10 s without updates
//! when a new start marker arrives). Post-processing merges close
//! windows, scores them, applies the validity gate for the configured
//! mode, and derives buffered effective windows.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::timeparse::{EpochMs, ThreadtimeLine};

/// A start marker arriving this long after the current window's last
/// update closes the window and opens a new one.
const STALE_START_MS: i64 = 10_000;
/// Consecutive windows closer than this are merged.
const MERGE_GAP_MS: i64 = 10_000;
/// Minimum duration for a valid window.
const MIN_VALID_MS: i64 = 20_000;
/// Activity count that can substitute for a strong start marker.
const MIN_VALID_ACTIVITY: u64 = 6;

static CLIENT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(limelog|moonlight)").expect("client tag regex"));
static STRONG_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[INTERNAL_STATS\]|\[STREAM_SESSION\]\s*(CONNECTED|HEARTBEAT|APP_SESSION_READY)")
        .expect("strong start regex")
});
static MID_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(configuring with format|using codec|average latency|connect request|pipeline\s+(start|created)|starting\s+\S*\s*pipeline)",
    )
    .expect("mid start regex")
});
static WEAK_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(launched new game session|resumed session|session\s+(START|RESUME)\b)")
        .expect("weak start regex")
});
static END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(connection terminated|stage\s+\S+\s+failed|STOP_REQUEST|SESSION_(FAILED|TERMINATED))",
    )
    .expect("end regex")
});
static FPS_ACTIVITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Rx\s+[\d.]+\s*/\s*Rd\s+[\d.]+\s*FPS").expect("fps regex"));

/// Validity gating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    Auto,
    Strict,
    All,
}

impl WindowMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(WindowMode::Auto),
            "strict" => Some(WindowMode::Strict),
            "all" => Some(WindowMode::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowMode::Auto => "auto",
            WindowMode::Strict => "strict",
            WindowMode::All => "all",
        }
    }
}

/// Phase of an arbitrary instant relative to detected sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stream,
    Preconnect,
    Post,
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Stream => "stream",
            Phase::Preconnect => "preconnect",
            Phase::Post => "post",
            Phase::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamWindow {
    pub id: u32,
    pub start_ts: EpochMs,
    pub end_ts: EpochMs,
    pub has_strong_start: bool,
    pub has_start_marker: bool,
    pub has_end_marker: bool,
    pub start_marker_count: u64,
    pub end_marker_count: u64,
    pub activity_count: u64,
    pub score: f64,
    pub valid: bool,
}

impl StreamWindow {
    pub fn duration_ms(&self) -> i64 {
        self.end_ts - self.start_ts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveWindow {
    pub id: u32,
    pub start_ts: EpochMs,
    pub end_ts: EpochMs,
}

/// Buffer configuration for effective-window expansion, seconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionBuffers {
    pub pre_buffer_sec: u32,
    pub post_buffer_sec: u32,
    pub clock_skew_tolerance_sec: u32,
}

impl Default for SessionBuffers {
    fn default() -> Self {
        SessionBuffers {
            pre_buffer_sec: 5,
            post_buffer_sec: 10,
            clock_skew_tolerance_sec: 2,
        }
    }
}

#[derive(Debug, Default)]
struct OpenWindow {
    start_ts: EpochMs,
    end_ts: EpochMs,
    has_strong_start: bool,
    has_start_marker: bool,
    has_end_marker: bool,
    start_marker_count: u64,
    end_marker_count: u64,
    activity_count: u64,
}

impl OpenWindow {
    fn open(ts: EpochMs) -> Self {
        OpenWindow {
            start_ts: ts,
            end_ts: ts,
            ..Default::default()
        }
    }
}

/// Marker-driven detector, fed logcat lines in file order.
#[derive(Debug, Default)]
pub struct SessionDetector {
    current: Option<OpenWindow>,
    closed: Vec<OpenWindow>,
    pub client_lines: u64,
    /// End markers observed with no window open.
    pub orphan_end_markers: u64,
}

impl SessionDetector {
    pub fn new() -> Self {
        SessionDetector::default()
    }

    /// Whether a line plausibly belongs to the streaming client.
    pub fn is_client_line(line: &ThreadtimeLine) -> bool {
        CLIENT_TAG_RE.is_match(&line.tag)
            || line.message.contains("[INTERNAL_STATS]")
            || line.message.contains("[STREAM_SESSION]")
    }

    pub fn observe(&mut self, line: &ThreadtimeLine) {
        if !Self::is_client_line(line) {
            return;
        }
        self.client_lines += 1;
        let msg = &line.message;
        let ts = line.ts;

        let strong = STRONG_START_RE.is_match(msg);
        let mid = MID_START_RE.is_match(msg);
        let weak = WEAK_START_RE.is_match(msg);
        let end = END_RE.is_match(msg);
        let is_start = strong || mid || weak;
        let is_activity = strong || mid || FPS_ACTIVITY_RE.is_match(msg);

        if is_start {
            let reopen = match &self.current {
                Some(cur) => ts - cur.end_ts > STALE_START_MS,
                None => true,
            };
            if reopen {
                if let Some(cur) = self.current.take() {
                    self.closed.push(cur);
                }
                self.current = Some(OpenWindow::open(ts));
            }
            let cur = self.current.as_mut().expect("window just ensured");
            cur.has_start_marker = true;
            cur.start_marker_count += 1;
            if strong {
                cur.has_strong_start = true;
            }
        }

        if is_activity {
            if let Some(cur) = self.current.as_mut() {
                if ts > cur.end_ts {
                    cur.end_ts = ts;
                }
                cur.activity_count += 1;
            }
        }

        if end {
            match self.current.take() {
                Some(mut cur) => {
                    if ts > cur.end_ts {
                        cur.end_ts = ts;
                    }
                    cur.has_end_marker = true;
                    cur.end_marker_count += 1;
                    self.closed.push(cur);
                }
                None => self.orphan_end_markers += 1,
            }
        }
    }

    /// Closes out the stream and produces the scored detection result.
    pub fn finish(
        mut self,
        mode: WindowMode,
        buffers: SessionBuffers,
        capture_start: EpochMs,
        capture_end: EpochMs,
    ) -> StreamDetection {
        if let Some(cur) = self.current.take() {
            self.closed.push(cur);
        }
        self.closed.sort_by_key(|w| w.start_ts);

        // Merge consecutive windows separated by less than the gap.
        let mut merged: Vec<OpenWindow> = Vec::with_capacity(self.closed.len());
        for w in self.closed {
            match merged.last_mut() {
                Some(prev) if w.start_ts - prev.end_ts < MERGE_GAP_MS => {
                    prev.end_ts = prev.end_ts.max(w.end_ts);
                    prev.has_strong_start |= w.has_strong_start;
                    prev.has_start_marker |= w.has_start_marker;
                    prev.has_end_marker |= w.has_end_marker;
                    prev.start_marker_count += w.start_marker_count;
                    prev.end_marker_count += w.end_marker_count;
                    prev.activity_count += w.activity_count;
                }
                _ => merged.push(w),
            }
        }

        let windows: Vec<StreamWindow> = merged
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                let score = score_window(&w);
                let valid = is_valid(&w, mode);
                StreamWindow {
                    id: (i + 1) as u32,
                    start_ts: w.start_ts,
                    end_ts: w.end_ts,
                    has_strong_start: w.has_strong_start,
                    has_start_marker: w.has_start_marker,
                    has_end_marker: w.has_end_marker,
                    start_marker_count: w.start_marker_count,
                    end_marker_count: w.end_marker_count,
                    activity_count: w.activity_count,
                    score,
                    valid,
                }
            })
            .collect();

        let effective = effective_windows(&windows, buffers, capture_start, capture_end);

        StreamDetection {
            windows,
            effective,
            mode,
            buffers,
            capture_start,
            capture_end,
            client_lines: self.client_lines,
            orphan_end_markers: self.orphan_end_markers,
        }
    }
}

fn score_window(w: &OpenWindow) -> f64 {
    let mut score = 0.0;
    if w.has_start_marker {
        score += 0.2;
    }
    if w.has_strong_start {
        score += 0.4;
    }
    score += (w.activity_count as f64 / 20.0).min(0.3);
    if w.has_end_marker {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

fn is_valid(w: &OpenWindow, mode: WindowMode) -> bool {
    if mode == WindowMode::All {
        return true;
    }
    let base = w.has_start_marker
        && (w.has_strong_start || w.activity_count >= MIN_VALID_ACTIVITY)
        && (w.end_ts - w.start_ts) >= MIN_VALID_MS;
    match mode {
        WindowMode::Auto => base,
        WindowMode::Strict => base && w.has_strong_start,
        WindowMode::All => unreachable!(),
    }
}

fn effective_windows(
    windows: &[StreamWindow],
    buffers: SessionBuffers,
    capture_start: EpochMs,
    capture_end: EpochMs,
) -> Vec<EffectiveWindow> {
    let pre = (buffers.pre_buffer_sec + buffers.clock_skew_tolerance_sec) as i64 * 1_000;
    let post = (buffers.post_buffer_sec + buffers.clock_skew_tolerance_sec) as i64 * 1_000;
    let mut expanded: Vec<(EpochMs, EpochMs)> = windows
        .iter()
        .filter(|w| w.valid)
        .map(|w| {
            (
                (w.start_ts - pre).max(capture_start),
                (w.end_ts + post).min(capture_end),
            )
        })
        .filter(|(s, e)| e > s)
        .collect();
    expanded.sort_by_key(|&(s, _)| s);

    let mut merged: Vec<(EpochMs, EpochMs)> = Vec::with_capacity(expanded.len());
    for (s, e) in expanded {
        match merged.last_mut() {
            Some((_, pe)) if s <= *pe => *pe = (*pe).max(e),
            _ => merged.push((s, e)),
        }
    }
    merged
        .into_iter()
        .enumerate()
        .map(|(i, (s, e))| EffectiveWindow {
            id: (i + 1) as u32,
            start_ts: s,
            end_ts: e,
        })
        .collect()
}

/// Final detection result, also the phase resolver for every other
/// parser in the report phase.
#[derive(Debug, Clone, Serialize)]
pub struct StreamDetection {
    pub windows: Vec<StreamWindow>,
    pub effective: Vec<EffectiveWindow>,
    pub mode: WindowMode,
    pub buffers: SessionBuffers,
    pub capture_start: EpochMs,
    pub capture_end: EpochMs,
    pub client_lines: u64,
    pub orphan_end_markers: u64,
}

impl StreamDetection {
    /// An empty detection over a capture range (used when logcat holds
    /// no client lines at all).
    pub fn empty(capture_start: EpochMs, capture_end: EpochMs) -> Self {
        StreamDetection {
            windows: Vec::new(),
            effective: Vec::new(),
            mode: WindowMode::Auto,
            buffers: SessionBuffers::default(),
            capture_start,
            capture_end,
            client_lines: 0,
            orphan_end_markers: 0,
        }
    }

    pub fn valid_windows(&self) -> impl Iterator<Item = &StreamWindow> {
        self.windows.iter().filter(|w| w.valid)
    }

    pub fn has_valid_session(&self) -> bool {
        self.windows.iter().any(|w| w.valid)
    }

    /// Phase of an instant. Inside a valid window is `stream`; before
    /// the first valid window (or when none exists) is `preconnect`;
    /// after the last is `post`; a gap between two valid windows is
    /// `unknown`.
    pub fn phase(&self, ts: EpochMs) -> Phase {
        let mut first_start = None;
        let mut last_end = None;
        for w in self.valid_windows() {
            if ts >= w.start_ts && ts <= w.end_ts {
                return Phase::Stream;
            }
            if first_start.is_none() {
                first_start = Some(w.start_ts);
            }
            last_end = Some(match last_end {
                Some(e) if e > w.end_ts => e,
                _ => w.end_ts,
            });
        }
        match (first_start, last_end) {
            (None, _) => Phase::Preconnect,
            (Some(first), _) if ts < first => Phase::Preconnect,
            (_, Some(last)) if ts > last => Phase::Post,
            _ => Phase::Unknown,
        }
    }

    /// Whether an instant falls inside any effective window.
    pub fn in_session(&self, ts: EpochMs) -> bool {
        // Effective windows are sorted and disjoint.
        let idx = self.effective.partition_point(|w| w.end_ts < ts);
        self.effective
            .get(idx)
            .map(|w| ts >= w.start_ts && ts <= w.end_ts)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeparse::{parse_threadtime, YearAnchor};

    fn feed(detector: &mut SessionDetector, lines: &[&str]) {
        let anchor = YearAnchor::from_year(2024);
        for l in lines {
            if let Some(parsed) = parse_threadtime(l, &anchor) {
                detector.observe(&parsed);
            }
        }
    }

    fn ts(s: &str) -> EpochMs {
        crate::timeparse::parse_iso(s).unwrap()
    }

    #[test]
    fn stale_start_reopens_window() {
        let mut d = SessionDetector::new();
        feed(
            &mut d,
            &[
                "01-01 10:00:00.000 1 1 I LimeLog: Launched new game session",
                // 30s of silence, then a fresh start marker.
                "01-01 10:00:30.000 1 1 I LimeLog: Launched new game session",
            ],
        );
        let det = d.finish(
            WindowMode::All,
            SessionBuffers::default(),
            ts("2024-01-01T09:59:00.000Z"),
            ts("2024-01-01T10:05:00.000Z"),
        );
        assert_eq!(det.windows.len(), 2);
    }

    #[test]
    fn nearby_windows_merge() {
        let mut d = SessionDetector::new();
        feed(
            &mut d,
            &[
                "01-01 10:00:00.000 1 1 I LimeLog: Launched new game session",
                "01-01 10:00:05.000 1 1 I LimeLog: Connection terminated",
                // 8s later, a new start: merged (< 10s gap).
                "01-01 10:00:13.000 1 1 I LimeLog: Launched new game session",
            ],
        );
        let det = d.finish(
            WindowMode::All,
            SessionBuffers::default(),
            ts("2024-01-01T09:59:00.000Z"),
            ts("2024-01-01T10:05:00.000Z"),
        );
        assert_eq!(det.windows.len(), 1);
        assert_eq!(det.windows[0].start_marker_count, 2);
    }

    #[test]
    fn phase_resolution() {
        let mut d = SessionDetector::new();
        let mut lines = vec![
            "01-01 10:00:00.000 1 1 I LimeLog: Launched new game session".to_string(),
        ];
        for i in 0..30 {
            lines.push(format!(
                "01-01 10:00:{:02}.000 1 1 I LimeLog: [INTERNAL_STATS] fps(total/rx/rd)=60/60/60 loss=0/1000(0.00%) lossEvents=0 rtt=15ms rttVar=2ms decode=3ms render=4ms total=22ms host[min/max/avg]=1/5/3ms",
                i + 10
            ));
        }
        lines.push("01-01 10:00:45.000 1 1 I LimeLog: Connection terminated".to_string());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        feed(&mut d, &refs);
        let det = d.finish(
            WindowMode::Auto,
            SessionBuffers::default(),
            ts("2024-01-01T09:50:00.000Z"),
            ts("2024-01-01T10:10:00.000Z"),
        );
        assert!(det.has_valid_session());
        assert_eq!(det.phase(ts("2024-01-01T10:00:20.000Z")), Phase::Stream);
        assert_eq!(det.phase(ts("2024-01-01T09:55:00.000Z")), Phase::Preconnect);
        assert_eq!(det.phase(ts("2024-01-01T10:05:00.000Z")), Phase::Post);
        assert!(det.in_session(ts("2024-01-01T09:59:56.000Z")));
        assert!(!det.in_session(ts("2024-01-01T09:59:50.000Z")));
    }
}
