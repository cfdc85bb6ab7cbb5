//! Ping-log parsing and latency derivation.
//!
//! Two dialects parse onto one timeline: device-side `ping` output and
//! host-side `nping` SENT/RCVD output (`ping::nping`). Both logs are
//! expected to carry the uniform capture prefix
//! `[ts_local=...][epoch_ms=...][source=...] <payload>`; when it is
//! missing, the parser falls back to `ping -D` bracket timestamps and
//! finally to sequence-based estimation against the capture start.

pub mod nping;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::session::{Phase, StreamDetection};
use crate::stats::{median, quantile};
use crate::timeparse::EpochMs;

/// Minimum high-latency threshold, ms.
const THRESHOLD_FLOOR_MS: f64 = 15.0;
/// Threshold margin over the median, ms.
const THRESHOLD_MARGIN_MS: f64 = 8.0;
/// Latency step between consecutive samples that counts as jitter, ms.
pub const JITTER_STEP_MS: f64 = 8.0;
/// Maximum gap between consecutive samples inside one burst, ms.
const BURST_GAP_MS: i64 = 1_200;

/// How a sample's timestamp was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TsSource {
    LogPrefixEpoch,
    PingD,
    SeqEstimated,
    Unknown,
}

impl TsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TsSource::LogPrefixEpoch => "log_prefix_epoch",
            TsSource::PingD => "ping_D",
            TsSource::SeqEstimated => "seq_estimated",
            TsSource::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PingStatus {
    Reply,
    NoReply,
}

impl PingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingStatus::Reply => "reply",
            PingStatus::NoReply => "no_reply",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingSample {
    pub ts: EpochMs,
    pub seq: Option<u32>,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub status: PingStatus,
    pub ts_source: TsSource,
    pub phase: Phase,
    pub in_session: bool,
    pub line: String,
}

/// A latency step of at least [`JITTER_STEP_MS`] between two
/// consecutive successful samples.
#[derive(Debug, Clone, Serialize)]
pub struct JitterEvent {
    pub ts: EpochMs,
    pub seq: Option<u32>,
    pub latency_ms: f64,
    pub prev_latency_ms: f64,
    pub delta_ms: f64,
    pub phase: Phase,
    pub in_session: bool,
}

/// Maximal run of above-threshold successful samples with consecutive
/// gaps of at most [`BURST_GAP_MS`].
#[derive(Debug, Clone, Serialize)]
pub struct HighLatencyBurst {
    pub start_ts: EpochMs,
    pub end_ts: EpochMs,
    pub count: usize,
    pub start_seq: Option<u32>,
    pub end_seq: Option<u32>,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingSummary {
    pub transmitted: u64,
    pub received: u64,
    pub packet_loss_pct: f64,
    /// True when the input carried no summary line and the numbers were
    /// synthesized from SENT/RCVD counts.
    pub synthesized: bool,
}

/// The fully-derived view of one ping log.
#[derive(Debug, Clone, Serialize)]
pub struct PingFocus {
    pub source: &'static str,
    pub interval_sec: f64,
    pub samples: Vec<PingSample>,
    pub threshold_ms: f64,
    /// Indices into `samples` of the high-latency events.
    pub high_latency_idx: Vec<usize>,
    pub bursts: Vec<HighLatencyBurst>,
    pub jitter_events: Vec<JitterEvent>,
    pub summary: Option<PingSummary>,
    pub skipped_no_ts: u64,
    pub unparsed_lines: u64,
}

impl PingFocus {
    pub fn success_count(&self) -> usize {
        self.samples.iter().filter(|s| s.success).count()
    }

    /// Ascending timestamps of jitter events.
    pub fn jitter_points(&self) -> Vec<EpochMs> {
        self.jitter_events.iter().map(|j| j.ts).collect()
    }

    /// Ascending timestamps of burst starts.
    pub fn burst_starts(&self) -> Vec<EpochMs> {
        self.bursts.iter().map(|b| b.start_ts).collect()
    }

    /// Sorted successful latencies, ms.
    pub fn sorted_latencies(&self) -> Vec<f64> {
        let mut v: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|s| if s.success { s.latency_ms } else { None })
            .collect();
        v.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
        v
    }

    /// Sorted absolute latency deltas between consecutive successful
    /// samples, ms.
    pub fn sorted_deltas(&self) -> Vec<f64> {
        let mut deltas = Vec::new();
        let mut prev: Option<f64> = None;
        for s in &self.samples {
            if let (true, Some(lat)) = (s.success, s.latency_ms) {
                if let Some(p) = prev {
                    deltas.push((lat - p).abs());
                }
                prev = Some(lat);
            }
        }
        deltas.sort_by(|a, b| a.partial_cmp(b).expect("deltas are finite"));
        deltas
    }

    pub fn loss_rate_pct(&self) -> f64 {
        if let Some(summary) = &self.summary {
            return summary.packet_loss_pct;
        }
        let total = self.samples.len();
        if total == 0 {
            return 0.0;
        }
        let failed = total - self.success_count();
        failed as f64 / total as f64 * 100.0
    }

    pub fn p95_latency(&self) -> f64 {
        quantile(&self.sorted_latencies(), 0.95)
    }

    pub fn p95_delta(&self) -> f64 {
        quantile(&self.sorted_deltas(), 0.95)
    }

    /// Empty focus for an absent log file.
    pub fn empty(source: &'static str, interval_sec: f64) -> Self {
        PingFocus {
            source,
            interval_sec,
            samples: Vec::new(),
            threshold_ms: THRESHOLD_FLOOR_MS,
            high_latency_idx: Vec::new(),
            bursts: Vec::new(),
            jitter_events: Vec::new(),
            summary: None,
            skipped_no_ts: 0,
            unparsed_lines: 0,
        }
    }
}

// --- Uniform prefix ---

static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[ts_local=([^\]]*)\]\[epoch_ms=(\d+)\]\[source=(device_side_ping|host_side_ping)\]\s?(.*)$",
    )
    .expect("ping prefix regex")
});

/// A payload stripped of the uniform prefix, plus its epoch when the
/// prefix was present.
pub(crate) struct PrefixedLine<'a> {
    pub epoch_ms: Option<EpochMs>,
    pub payload: &'a str,
}

pub(crate) fn strip_prefix(line: &str) -> PrefixedLine<'_> {
    if let Some(caps) = PREFIX_RE.captures(line) {
        let epoch = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
        // Captures borrow from `line`; recover the payload range.
        let payload_start = caps.get(4).map(|m| m.start()).unwrap_or(line.len());
        PrefixedLine {
            epoch_ms: epoch,
            payload: &line[payload_start..],
        }
    } else {
        PrefixedLine {
            epoch_ms: None,
            payload: line,
        }
    }
}

// --- Device `ping` dialect ---

static PING_D_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d+)\.(\d+)\]\s+(.*)$").expect("ping -D regex"));
static SEQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"icmp_seq=(\d+)").expect("seq regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=([\d.]+)\s*ms").expect("time regex"));
static PING_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+)(?: packets)? received,.*?([\d.]+)% packet loss")
        .expect("ping summary regex")
});

/// Streaming parser for the device-side ping log.
pub struct DevicePingParser {
    capture_start: Option<EpochMs>,
    interval_sec: f64,
    samples: Vec<PingSample>,
    summary: Option<PingSummary>,
    skipped_no_ts: u64,
    unparsed_lines: u64,
}

impl DevicePingParser {
    pub fn new(capture_start: Option<EpochMs>, interval_sec: f64) -> Self {
        DevicePingParser {
            capture_start,
            interval_sec,
            samples: Vec::new(),
            summary: None,
            skipped_no_ts: 0,
            unparsed_lines: 0,
        }
    }

    pub fn push_line(&mut self, raw: &str) {
        let stripped = strip_prefix(raw);
        let mut payload = stripped.payload;
        let mut ts = stripped.epoch_ms;
        let mut ts_source = if ts.is_some() {
            TsSource::LogPrefixEpoch
        } else {
            TsSource::Unknown
        };

        // Fallback 1: `ping -D` absolute-seconds bracket.
        if ts.is_none() {
            if let Some(caps) = PING_D_RE.captures(payload) {
                if let (Ok(secs), Ok(frac)) = (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
                    let frac_digits = caps[2].len() as u32;
                    let frac_ms = if frac_digits >= 3 {
                        frac / 10_i64.pow(frac_digits - 3)
                    } else {
                        frac * 10_i64.pow(3 - frac_digits)
                    };
                    ts = Some(secs * 1_000 + frac_ms);
                    ts_source = TsSource::PingD;
                    let start = caps.get(3).map(|m| m.start()).unwrap_or(0);
                    payload = &payload[start..];
                }
            }
        }

        if let Some(caps) = PING_SUMMARY_RE.captures(payload) {
            self.summary = Some(PingSummary {
                transmitted: caps[1].parse().unwrap_or(0),
                received: caps[2].parse().unwrap_or(0),
                packet_loss_pct: caps[3].parse().unwrap_or(0.0),
                synthesized: false,
            });
            return;
        }

        let seq = SEQ_RE
            .captures(payload)
            .and_then(|c| c[1].parse::<u32>().ok());
        let latency = TIME_RE
            .captures(payload)
            .and_then(|c| c[1].parse::<f64>().ok());

        if seq.is_none() && latency.is_none() {
            // Not a sample line (banner, blank, stderr chatter).
            self.unparsed_lines += 1;
            return;
        }

        // Fallback 2: estimate from sequence number and capture start.
        if ts.is_none() {
            match (self.capture_start, seq) {
                (Some(start), Some(n)) if n >= 1 => {
                    ts = Some(start + ((n - 1) as f64 * self.interval_sec * 1_000.0).round() as i64);
                    ts_source = TsSource::SeqEstimated;
                }
                _ => {
                    self.skipped_no_ts += 1;
                    return;
                }
            }
        }

        let ts = ts.expect("timestamp established above");
        let success = latency.is_some();
        self.samples.push(PingSample {
            ts,
            seq,
            success,
            latency_ms: latency,
            status: if success {
                PingStatus::Reply
            } else {
                PingStatus::NoReply
            },
            ts_source,
            phase: Phase::Unknown,
            in_session: false,
            line: raw.to_string(),
        });
    }

    pub fn finish(self, detection: &StreamDetection) -> PingFocus {
        finalize(
            "device_side_ping",
            self.interval_sec,
            self.samples,
            self.summary,
            self.skipped_no_ts,
            self.unparsed_lines,
            detection,
        )
    }
}

/// Shared tail of both dialects: sorts samples, resolves phases,
/// computes the threshold and the derived event lists.
pub(crate) fn finalize(
    source: &'static str,
    interval_sec: f64,
    mut samples: Vec<PingSample>,
    summary: Option<PingSummary>,
    skipped_no_ts: u64,
    unparsed_lines: u64,
    detection: &StreamDetection,
) -> PingFocus {
    samples.sort_by_key(|s| s.ts);
    for s in &mut samples {
        s.phase = detection.phase(s.ts);
        s.in_session = detection.in_session(s.ts);
    }

    let sorted_latencies: Vec<f64> = {
        let mut v: Vec<f64> = samples
            .iter()
            .filter_map(|s| if s.success { s.latency_ms } else { None })
            .collect();
        v.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
        v
    };
    let threshold_ms = THRESHOLD_FLOOR_MS.max(median(&sorted_latencies) + THRESHOLD_MARGIN_MS);

    let high_latency_idx: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.success && s.latency_ms.map(|l| l >= threshold_ms).unwrap_or(false))
        .map(|(i, _)| i)
        .collect();

    // Maximal runs over the high-latency events with bounded gaps.
    let mut bursts: Vec<HighLatencyBurst> = Vec::new();
    let mut run: Vec<usize> = Vec::new();
    let mut flush = |run: &mut Vec<usize>, bursts: &mut Vec<HighLatencyBurst>| {
        if run.is_empty() {
            return;
        }
        let lats: Vec<f64> = run
            .iter()
            .filter_map(|&i| samples[i].latency_ms)
            .collect();
        let max = lats.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = lats.iter().sum::<f64>() / lats.len() as f64;
        bursts.push(HighLatencyBurst {
            start_ts: samples[run[0]].ts,
            end_ts: samples[*run.last().expect("run non-empty")].ts,
            count: run.len(),
            start_seq: samples[run[0]].seq,
            end_seq: samples[*run.last().expect("run non-empty")].seq,
            max_latency_ms: max,
            avg_latency_ms: avg,
        });
        run.clear();
    };
    for &i in &high_latency_idx {
        if let Some(&prev) = run.last() {
            if samples[i].ts - samples[prev].ts > BURST_GAP_MS {
                flush(&mut run, &mut bursts);
            }
        }
        run.push(i);
    }
    flush(&mut run, &mut bursts);

    // Jitter: latency steps between consecutive successful samples.
    let mut jitter_events = Vec::new();
    let mut prev: Option<(&PingSample, f64)> = None;
    for s in &samples {
        if let (true, Some(lat)) = (s.success, s.latency_ms) {
            if let Some((_, prev_lat)) = prev {
                let delta = lat - prev_lat;
                if delta.abs() >= JITTER_STEP_MS {
                    jitter_events.push(JitterEvent {
                        ts: s.ts,
                        seq: s.seq,
                        latency_ms: lat,
                        prev_latency_ms: prev_lat,
                        delta_ms: delta,
                        phase: s.phase,
                        in_session: s.in_session,
                    });
                }
            }
            prev = Some((s, lat));
        }
    }

    PingFocus {
        source,
        interval_sec,
        samples,
        threshold_ms,
        high_latency_idx,
        bursts,
        jitter_events,
        summary,
        skipped_no_ts,
        unparsed_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> StreamDetection {
        StreamDetection::empty(0, 2_000_000_000_000)
    }

    #[test]
    fn timestamp_source_precedence() {
        let mut p = DevicePingParser::new(Some(1_700_000_000_000), 0.2);
        p.push_line("[ts_local=2023-11-15 06:13:20.000 +08:00][epoch_ms=1700000000000][source=device_side_ping] 64 bytes from 1.1.1.1: icmp_seq=1 ttl=55 time=11.2 ms");
        p.push_line("[1700000000.900] 64 bytes from 1.1.1.1: icmp_seq=2 ttl=55 time=9.4 ms");
        p.push_line("64 bytes from 1.1.1.1: icmp_seq=3 ttl=55 time=22.5 ms");
        let focus = p.finish(&detection());
        assert_eq!(focus.samples.len(), 3);
        let by_seq: Vec<_> = focus
            .samples
            .iter()
            .map(|s| (s.seq.unwrap(), s.ts, s.ts_source))
            .collect();
        assert!(by_seq.contains(&(1, 1_700_000_000_000, TsSource::LogPrefixEpoch)));
        assert!(by_seq.contains(&(2, 1_700_000_000_900, TsSource::PingD)));
        assert!(by_seq.contains(&(3, 1_700_000_000_400, TsSource::SeqEstimated)));
        // median([9.4, 11.2, 22.5]) + 8 = 19.2 > 15.
        assert!((focus.threshold_ms - 19.2).abs() < 1e-9);
        assert_eq!(focus.high_latency_idx.len(), 1);
        let hi = &focus.samples[focus.high_latency_idx[0]];
        assert_eq!(hi.seq, Some(3));
    }

    #[test]
    fn untimestamped_line_is_counted() {
        let mut p = DevicePingParser::new(None, 1.0);
        p.push_line("64 bytes from 1.1.1.1: icmp_seq=9 ttl=55 time=10.0 ms");
        let focus = p.finish(&detection());
        assert!(focus.samples.is_empty());
        assert_eq!(focus.skipped_no_ts, 1);
    }

    #[test]
    fn no_reply_lines_parse() {
        let mut p = DevicePingParser::new(Some(0), 1.0);
        p.push_line("[epoch garbage] not a sample");
        p.push_line("no answer yet for icmp_seq=4");
        let focus = p.finish(&detection());
        assert_eq!(focus.samples.len(), 1);
        assert!(!focus.samples[0].success);
        assert_eq!(focus.samples[0].status, PingStatus::NoReply);
        assert_eq!(focus.unparsed_lines, 1);
    }

    #[test]
    fn summary_line_is_captured() {
        let mut p = DevicePingParser::new(Some(0), 1.0);
        p.push_line("[ts_local=x][epoch_ms=1000][source=device_side_ping] 4 packets transmitted, 3 received, 25.0% packet loss, time 3004ms");
        let focus = p.finish(&detection());
        let summary = focus.summary.unwrap();
        assert_eq!(summary.transmitted, 4);
        assert_eq!(summary.received, 3);
        assert!((summary.packet_loss_pct - 25.0).abs() < 1e-9);
        assert!(!summary.synthesized);
    }

    #[test]
    fn jitter_and_burst_derivation() {
        let mut p = DevicePingParser::new(Some(0), 1.0);
        // seq-estimated at 1s cadence: 0, 1000, 2000, ...
        for (i, lat) in [10.0, 11.0, 30.0, 31.0, 10.5, 40.0].iter().enumerate() {
            p.push_line(&format!(
                "64 bytes from 1.1.1.1: icmp_seq={} ttl=55 time={} ms",
                i + 1,
                lat
            ));
        }
        let focus = p.finish(&detection());
        // median = 20.5ish -> threshold > 15; samples 30, 31, 40 are high.
        assert_eq!(focus.high_latency_idx.len(), 3);
        // 30/31 at 2s,3s are one burst (gap 1000 <= 1200); 40 at 5s is
        // separate (gap 2000 > 1200).
        assert_eq!(focus.bursts.len(), 2);
        assert_eq!(focus.bursts[0].count, 2);
        assert!((focus.bursts[0].max_latency_ms - 31.0).abs() < 1e-9);
        // Jitter steps: 11->30 (+19), 31->10.5 (-20.5), 10.5->40 (+29.5).
        assert_eq!(focus.jitter_events.len(), 3);
        assert!((focus.jitter_events[0].delta_ms - 19.0).abs() < 1e-9);
    }
}
