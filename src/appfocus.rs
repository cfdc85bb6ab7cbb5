//! Streaming-client line extraction: structured INTERNAL_STATS records,
//! a bank of legacy metric extractors, and anomaly flagging.
//!
//! Every retained line is also echoed to `app_focus.log`; a line is
//! retained only when it carries a metric, an anomaly, a session
//! marker, or is a warning/error from the client's own tag.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use crate::session::{Phase, SessionDetector, StreamDetection};
use crate::timeparse::{EpochMs, ThreadtimeLine};

/// Pending-audio depth above which the backlog anomaly fires.
const AUDIO_BACKLOG_FRAMES: f64 = 16.0;

/// Confidence attached to structured INTERNAL_STATS metrics.
const CONF_INTERNAL: f64 = 0.95;
/// Confidence attached to legacy-pattern metrics.
const CONF_LEGACY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    InternalStats,
    LegacyPattern,
}

impl MetricSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSource::InternalStats => "internal_stats",
            MetricSource::LegacyPattern => "legacy_pattern",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppMetricSample {
    pub ts: EpochMs,
    pub metric: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub phase: Phase,
    pub in_session: bool,
    pub confidence: f64,
    pub metric_source: MetricSource,
}

/// One `[INTERNAL_STATS]` line, all fields parsed together so
/// downstream consumers can treat it as a joint observation.
#[derive(Debug, Clone, Serialize)]
pub struct InternalStatsSample {
    pub ts: EpochMs,
    pub fps_total: f64,
    pub fps_rx: f64,
    pub fps_rd: f64,
    pub loss_frames: u64,
    pub loss_total: u64,
    pub loss_pct: f64,
    pub loss_events: u64,
    pub rtt_ms: f64,
    pub rtt_var_ms: f64,
    pub decode_ms: f64,
    pub render_ms: f64,
    pub total_ms: f64,
    pub host_min_ms: f64,
    pub host_max_ms: f64,
    pub host_avg_ms: f64,
    pub decoder: Option<String>,
    pub hdr: Option<bool>,
    pub phase: Phase,
    pub in_session: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    NetworkUnstable,
    ConnectionFailure,
    PollFailedQuickly,
    Offline,
    PendingAudioBacklog,
    StageFailed,
    FramePacing,
    WarnOrError,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::NetworkUnstable => "network_unstable",
            AnomalyKind::ConnectionFailure => "connection_failure",
            AnomalyKind::PollFailedQuickly => "poll_failed_quickly",
            AnomalyKind::Offline => "offline",
            AnomalyKind::PendingAudioBacklog => "pending_audio_backlog",
            AnomalyKind::StageFailed => "stage_failed",
            AnomalyKind::FramePacing => "frame_pacing",
            AnomalyKind::WarnOrError => "warn_or_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppAnomaly {
    pub ts: EpochMs,
    pub kind: AnomalyKind,
    pub priority: char,
    pub phase: Phase,
    pub in_session: bool,
    pub line: String,
}

/// Noise-drop policy for the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoisePolicy {
    Balanced,
    Aggressive,
    Conservative,
}

impl NoisePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "balanced" => Some(NoisePolicy::Balanced),
            "aggressive" => Some(NoisePolicy::Aggressive),
            "conservative" => Some(NoisePolicy::Conservative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoisePolicy::Balanced => "balanced",
            NoisePolicy::Aggressive => "aggressive",
            NoisePolicy::Conservative => "conservative",
        }
    }
}

// --- INTERNAL_STATS grammar ---

static INTERNAL_STATS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[INTERNAL_STATS\]\s+fps\(total/rx/rd\)=([\d.]+)/([\d.]+)/([\d.]+)\s+loss=(\d+)/(\d+)\(([\d.]+)%\)\s+lossEvents=(\d+)\s+rtt=([\d.]+)ms\s+rttVar=([\d.]+)ms\s+decode=([\d.]+)ms\s+render=([\d.]+)ms\s+total=([\d.]+)ms\s+host\[min/max/avg\]=([\d.]+)/([\d.]+)/([\d.]+)ms(?:\s+decoder=(\S+))?(?:\s+hdr=(on|off|true|false))?",
    )
    .expect("internal stats regex")
});

// --- Legacy metric bank ---

struct LegacyPattern {
    re: &'static Lazy<Regex>,
    metrics: &'static [(usize, &'static str, &'static str)],
}

macro_rules! legacy_re {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).expect(stringify!($name)));
    };
}

legacy_re!(FPS_PAIR_RE, r"(?i)Rx\s+([\d.]+)\s*/\s*Rd\s+([\d.]+)\s*FPS");
legacy_re!(
    RTT_JITTER_RE,
    r"(?i)RTT:?\s+([\d.]+)\s*ms(?:\s*[,(]?\s*(?:variance|jitter|±):?\s*([\d.]+)\s*ms)?"
);
legacy_re!(LOSS_RATE_RE, r"(?i)(?:frame\s+)?loss\s+rate:?\s*([\d.]+)\s*%");
legacy_re!(
    PRECISE_SYNC_RE,
    r"(?i)sync:?\s+off(?:set)?=(-?[\d.]+)ms\s+drift=(-?[\d.]+)ms"
);
legacy_re!(PENDING_AUDIO_RE, r"(?i)pending\s+audio\s+frames?:?\s*(\d+)");
legacy_re!(
    TIMEOUT_CFG_RE,
    r"(?i)(?:connection|poll)\s+timeout:?\s*(\d+)\s*ms"
);
legacy_re!(
    CONN_STATS_RE,
    r"(?i)bandwidth:?\s*([\d.]+)\s*Mbps"
);
legacy_re!(
    E2E_LATENCY_RE,
    r"(?i)(?:end-to-end|total)\s+latency:?\s*([\d.]+)\s*ms"
);
legacy_re!(DECODER_LATENCY_RE, r"(?i)decoder\s+latency:?\s*([\d.]+)\s*ms");
legacy_re!(
    DISPLAY_REFRESH_RE,
    r"(?i)display\s+refresh(?:\s+rate)?:?\s*([\d.]+)"
);

static LEGACY_BANK: &[LegacyPattern] = &[
    LegacyPattern {
        re: &FPS_PAIR_RE,
        metrics: &[(1, "fps_rx", "fps"), (2, "fps_rd", "fps")],
    },
    LegacyPattern {
        re: &RTT_JITTER_RE,
        metrics: &[(1, "rtt_ms", "ms"), (2, "rtt_var_ms", "ms")],
    },
    LegacyPattern {
        re: &LOSS_RATE_RE,
        metrics: &[(1, "loss_pct", "%")],
    },
    LegacyPattern {
        re: &PRECISE_SYNC_RE,
        metrics: &[(1, "sync_offset_ms", "ms"), (2, "sync_drift_ms", "ms")],
    },
    LegacyPattern {
        re: &PENDING_AUDIO_RE,
        metrics: &[(1, "audio_pending_frames", "frames")],
    },
    LegacyPattern {
        re: &TIMEOUT_CFG_RE,
        metrics: &[(1, "conn_timeout_ms", "ms")],
    },
    LegacyPattern {
        re: &CONN_STATS_RE,
        metrics: &[(1, "bandwidth_mbps", "Mbps")],
    },
    LegacyPattern {
        re: &E2E_LATENCY_RE,
        metrics: &[(1, "e2e_latency_ms", "ms")],
    },
    LegacyPattern {
        re: &DECODER_LATENCY_RE,
        metrics: &[(1, "decoder_latency_ms", "ms")],
    },
    LegacyPattern {
        re: &DISPLAY_REFRESH_RE,
        metrics: &[(1, "display_refresh_hz", "Hz")],
    },
];

// --- Anomaly patterns ---

legacy_re!(
    NET_UNSTABLE_RE,
    r"(?i)(network\s+(is\s+)?unstable|connection\s+(is\s+)?poor|poor\s+(network|connection))"
);
legacy_re!(
    CONN_FAIL_RE,
    r"(?i)(connection\s+(failed|lost)|failed\s+to\s+connect)"
);
legacy_re!(
    POLL_FAST_FAIL_RE,
    r"(?i)poll.*failed.*(quickly|immediately|after\s+\d+\s*ms)"
);
legacy_re!(OFFLINE_RE, r"(?i)(server|host)\s+(is\s+)?offline");
legacy_re!(
    STAGE_FAIL_RE,
    r"(?i)(stage\s+\S+\s+failed|session\s+terminated|terminated\s+unexpectedly)"
);
legacy_re!(
    FRAME_PACING_RE,
    r"(?i)(frame\s+pacing|skipp?(ed|ing)\s+\d*\s*frames?|frame\s+skip)"
);

legacy_re!(
    APP_NOISE_RE,
    r"(?i)(eglCodecCommon|AudioTrack:\s+releaseBuffer|MediaCodec:\s+(setState|flush)|BufferQueue)"
);
legacy_re!(
    PRECONNECT_POLL_RE,
    r"(?i)(preconnect|poll(ing)?\s+(server|app\s+list|status)|serverinfo\s+(request|poll))"
);

/// Drop accounting for the extractor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppFocusCounters {
    pub client_lines: u64,
    pub kept_lines: u64,
    pub dropped_app_noise: u64,
    pub dropped_preconnect_poll: u64,
    pub dropped_no_signal: u64,
    pub anomaly_duplicates: u64,
}

/// Extraction result over the full logcat stream.
#[derive(Debug)]
pub struct AppFocus {
    pub metrics: Vec<AppMetricSample>,
    pub internal: Vec<InternalStatsSample>,
    pub anomalies: Vec<AppAnomaly>,
    /// Lines retained for `app_focus.log`, in input order.
    pub kept_lines: Vec<String>,
    pub counters: AppFocusCounters,
}

impl AppFocus {
    /// Ascending anomaly timestamps.
    pub fn anomaly_points(&self) -> Vec<EpochMs> {
        let mut v: Vec<EpochMs> = self.anomalies.iter().map(|a| a.ts).collect();
        v.sort_unstable();
        v
    }

    /// Ascending timestamps of samples of one metric.
    pub fn metric_points(&self, metric: &str) -> Vec<EpochMs> {
        let mut v: Vec<EpochMs> = self
            .metrics
            .iter()
            .filter(|m| m.metric == metric)
            .map(|m| m.ts)
            .collect();
        v.sort_unstable();
        v
    }

    /// Sorted values of one metric.
    pub fn metric_values_sorted(&self, metric: &str) -> Vec<f64> {
        let mut v: Vec<f64> = self
            .metrics
            .iter()
            .filter(|m| m.metric == metric)
            .map(|m| m.value)
            .collect();
        v.sort_by(|a, b| a.partial_cmp(b).expect("metric values are finite"));
        v
    }

    /// Values of one metric at samples whose ts is within `window_ms`
    /// of any anchor. Anchors must be ascending.
    pub fn metric_values_near(&self, metric: &str, anchors: &[EpochMs], window_ms: i64) -> Vec<f64> {
        use crate::stats::count_in_window;
        self.metrics
            .iter()
            .filter(|m| m.metric == metric)
            .filter(|m| count_in_window(anchors, m.ts - window_ms, m.ts + window_ms) > 0)
            .map(|m| m.value)
            .collect()
    }
}

/// Streaming extractor over threadtime lines.
pub struct AppFocusExtractor<'a> {
    detection: &'a StreamDetection,
    policy: NoisePolicy,
    metrics: Vec<AppMetricSample>,
    internal: Vec<InternalStatsSample>,
    anomalies: Vec<AppAnomaly>,
    seen_anomalies: HashSet<(EpochMs, AnomalyKind, String)>,
    kept_lines: Vec<String>,
    counters: AppFocusCounters,
}

impl<'a> AppFocusExtractor<'a> {
    pub fn new(detection: &'a StreamDetection, policy: NoisePolicy) -> Self {
        AppFocusExtractor {
            detection,
            policy,
            metrics: Vec::new(),
            internal: Vec::new(),
            anomalies: Vec::new(),
            seen_anomalies: HashSet::new(),
            kept_lines: Vec::new(),
            counters: AppFocusCounters::default(),
        }
    }

    fn push_metric(
        &mut self,
        ts: EpochMs,
        phase: Phase,
        in_session: bool,
        metric: &'static str,
        value: f64,
        unit: &'static str,
        source: MetricSource,
    ) {
        self.metrics.push(AppMetricSample {
            ts,
            metric,
            value,
            unit,
            phase,
            in_session,
            confidence: match source {
                MetricSource::InternalStats => CONF_INTERNAL,
                MetricSource::LegacyPattern => CONF_LEGACY,
            },
            metric_source: source,
        });
    }

    fn parse_internal_stats(
        &mut self,
        line: &ThreadtimeLine,
        phase: Phase,
        in_session: bool,
    ) -> bool {
        let Some(caps) = INTERNAL_STATS_RE.captures(&line.message) else {
            return false;
        };
        let f = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
        let u = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
        let sample = InternalStatsSample {
            ts: line.ts,
            fps_total: f(1),
            fps_rx: f(2),
            fps_rd: f(3),
            loss_frames: u(4),
            loss_total: u(5),
            loss_pct: f(6),
            loss_events: u(7),
            rtt_ms: f(8),
            rtt_var_ms: f(9),
            decode_ms: f(10),
            render_ms: f(11),
            total_ms: f(12),
            host_min_ms: f(13),
            host_max_ms: f(14),
            host_avg_ms: f(15),
            decoder: caps.get(16).map(|m| m.as_str().to_string()),
            hdr: caps
                .get(17)
                .map(|m| matches!(m.as_str(), "on" | "true")),
            phase,
            in_session,
        };
        let fields: [(&'static str, f64, &'static str); 15] = [
            ("fps_total", sample.fps_total, "fps"),
            ("fps_rx", sample.fps_rx, "fps"),
            ("fps_rd", sample.fps_rd, "fps"),
            ("loss_frames", sample.loss_frames as f64, "frames"),
            ("loss_total", sample.loss_total as f64, "frames"),
            ("loss_pct", sample.loss_pct, "%"),
            ("loss_events", sample.loss_events as f64, "events"),
            ("rtt_ms", sample.rtt_ms, "ms"),
            ("rtt_var_ms", sample.rtt_var_ms, "ms"),
            ("decode_ms", sample.decode_ms, "ms"),
            ("render_ms", sample.render_ms, "ms"),
            ("total_ms", sample.total_ms, "ms"),
            ("host_latency_min_ms", sample.host_min_ms, "ms"),
            ("host_latency_max_ms", sample.host_max_ms, "ms"),
            ("host_latency_avg_ms", sample.host_avg_ms, "ms"),
        ];
        for (metric, value, unit) in fields {
            self.push_metric(
                line.ts,
                phase,
                in_session,
                metric,
                value,
                unit,
                MetricSource::InternalStats,
            );
        }
        self.internal.push(sample);
        true
    }

    fn run_legacy_bank(&mut self, line: &ThreadtimeLine, phase: Phase, in_session: bool) -> bool {
        let mut hit = false;
        for pattern in LEGACY_BANK {
            if let Some(caps) = pattern.re.captures(&line.message) {
                for &(group, metric, unit) in pattern.metrics {
                    if let Some(m) = caps.get(group) {
                        if let Ok(value) = m.as_str().parse::<f64>() {
                            self.push_metric(
                                line.ts,
                                phase,
                                in_session,
                                metric,
                                value,
                                unit,
                                MetricSource::LegacyPattern,
                            );
                            hit = true;
                        }
                    }
                }
            }
        }
        hit
    }

    fn push_anomaly(
        &mut self,
        line: &ThreadtimeLine,
        phase: Phase,
        in_session: bool,
        kind: AnomalyKind,
    ) {
        let key = (line.ts, kind, line.message.clone());
        if !self.seen_anomalies.insert(key) {
            self.counters.anomaly_duplicates += 1;
            return;
        }
        self.anomalies.push(AppAnomaly {
            ts: line.ts,
            kind,
            priority: line.level,
            phase,
            in_session,
            line: line.message.clone(),
        });
    }

    fn detect_anomalies(&mut self, line: &ThreadtimeLine, phase: Phase, in_session: bool) -> bool {
        let msg = &line.message;
        let mut hit = false;
        let checks: [(bool, AnomalyKind); 6] = [
            (NET_UNSTABLE_RE.is_match(msg), AnomalyKind::NetworkUnstable),
            (CONN_FAIL_RE.is_match(msg), AnomalyKind::ConnectionFailure),
            (POLL_FAST_FAIL_RE.is_match(msg), AnomalyKind::PollFailedQuickly),
            (OFFLINE_RE.is_match(msg), AnomalyKind::Offline),
            (STAGE_FAIL_RE.is_match(msg), AnomalyKind::StageFailed),
            (FRAME_PACING_RE.is_match(msg), AnomalyKind::FramePacing),
        ];
        for (matched, kind) in checks {
            if matched {
                self.push_anomaly(line, phase, in_session, kind);
                hit = true;
            }
        }
        if let Some(caps) = PENDING_AUDIO_RE.captures(msg) {
            if let Ok(depth) = caps[1].parse::<f64>() {
                if depth > AUDIO_BACKLOG_FRAMES {
                    self.push_anomaly(line, phase, in_session, AnomalyKind::PendingAudioBacklog);
                    hit = true;
                }
            }
        }
        // A warning or worse from the client tag is an anomaly on its own.
        if matches!(line.level, 'W' | 'E' | 'F' | 'A') {
            self.push_anomaly(line, phase, in_session, AnomalyKind::WarnOrError);
            hit = true;
        }
        hit
    }

    pub fn observe(&mut self, line: &ThreadtimeLine) {
        if !SessionDetector::is_client_line(line) {
            return;
        }
        self.counters.client_lines += 1;

        // Known app noise is dropped unconditionally.
        if APP_NOISE_RE.is_match(&line.message) {
            self.counters.dropped_app_noise += 1;
            return;
        }

        let phase = self.detection.phase(line.ts);
        let in_session = self.detection.in_session(line.ts);

        // Preconnect-polling chatter survives only under the
        // conservative policy, and only inside a stream phase.
        if PRECONNECT_POLL_RE.is_match(&line.message)
            && !(self.policy == NoisePolicy::Conservative && phase == Phase::Stream)
        {
            self.counters.dropped_preconnect_poll += 1;
            return;
        }

        let has_internal = self.parse_internal_stats(line, phase, in_session);
        let has_legacy = if has_internal {
            false
        } else {
            self.run_legacy_bank(line, phase, in_session)
        };
        let has_anomaly = self.detect_anomalies(line, phase, in_session);
        let is_marker = line.message.contains("[STREAM_SESSION]")
            || line.message.contains("[INTERNAL_STATS]");

        if has_internal || has_legacy || has_anomaly || is_marker {
            self.counters.kept_lines += 1;
            self.kept_lines.push(format!(
                "{} {} {}: {}",
                crate::timeparse::fmt_ts(line.ts),
                line.level,
                line.tag,
                line.message
            ));
        } else {
            self.counters.dropped_no_signal += 1;
        }
    }

    pub fn finish(self) -> AppFocus {
        AppFocus {
            metrics: self.metrics,
            internal: self.internal,
            anomalies: self.anomalies,
            kept_lines: self.kept_lines,
            counters: self.counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamDetection;
    use crate::timeparse::{parse_threadtime, YearAnchor};

    fn line(s: &str) -> ThreadtimeLine {
        parse_threadtime(s, &YearAnchor::from_year(2024)).unwrap()
    }

    fn extractor(detection: &StreamDetection) -> AppFocusExtractor<'_> {
        AppFocusExtractor::new(detection, NoisePolicy::Balanced)
    }

    #[test]
    fn internal_stats_parses_all_fields() {
        let det = StreamDetection::empty(0, 2_000_000_000_000);
        let mut x = extractor(&det);
        x.observe(&line(
            "01-01 10:00:10.000 1 1 I LimeLog: [INTERNAL_STATS] fps(total/rx/rd)=60/59/58 loss=5/1000(0.50%) lossEvents=2 rtt=15ms rttVar=2ms decode=3ms render=4ms total=22ms host[min/max/avg]=1/5/3ms decoder=c2.qti.avc hdr=on",
        ));
        let focus = x.finish();
        assert_eq!(focus.internal.len(), 1);
        let s = &focus.internal[0];
        assert_eq!(s.fps_total, 60.0);
        assert_eq!(s.fps_rx, 59.0);
        assert_eq!(s.loss_frames, 5);
        assert_eq!(s.loss_pct, 0.5);
        assert_eq!(s.rtt_var_ms, 2.0);
        assert_eq!(s.host_avg_ms, 3.0);
        assert_eq!(s.decoder.as_deref(), Some("c2.qti.avc"));
        assert_eq!(s.hdr, Some(true));
        // One metric sample per numeric field.
        assert_eq!(focus.metrics.len(), 15);
        assert!(focus
            .metrics
            .iter()
            .all(|m| m.metric_source == MetricSource::InternalStats));
    }

    #[test]
    fn legacy_bank_tags_source() {
        let det = StreamDetection::empty(0, 2_000_000_000_000);
        let mut x = extractor(&det);
        x.observe(&line(
            "01-01 10:00:10.000 1 1 I LimeLog: Average latency report: RTT: 18 ms (variance: 4 ms)",
        ));
        let focus = x.finish();
        let rtt: Vec<_> = focus.metrics.iter().filter(|m| m.metric == "rtt_ms").collect();
        assert_eq!(rtt.len(), 1);
        assert_eq!(rtt[0].value, 18.0);
        assert_eq!(rtt[0].metric_source, MetricSource::LegacyPattern);
        assert!(focus.metrics.iter().any(|m| m.metric == "rtt_var_ms" && m.value == 4.0));
    }

    #[test]
    fn anomaly_dedupe_on_ts_kind_line() {
        let det = StreamDetection::empty(0, 2_000_000_000_000);
        let mut x = extractor(&det);
        let l = line("01-01 10:00:10.000 1 1 W LimeLog: Network is unstable");
        x.observe(&l);
        x.observe(&l);
        let focus = x.finish();
        // network_unstable + warn_or_error, each once.
        assert_eq!(focus.anomalies.len(), 2);
        assert_eq!(focus.counters.anomaly_duplicates, 2);
    }

    #[test]
    fn preconnect_poll_dropped_under_balanced() {
        let det = StreamDetection::empty(0, 2_000_000_000_000);
        let mut x = extractor(&det);
        x.observe(&line(
            "01-01 10:00:10.000 1 1 D Moonlight: polling server status attempt 2",
        ));
        let focus = x.finish();
        assert_eq!(focus.counters.dropped_preconnect_poll, 1);
        assert!(focus.kept_lines.is_empty());
    }

    #[test]
    fn plain_info_line_without_signal_dropped() {
        let det = StreamDetection::empty(0, 2_000_000_000_000);
        let mut x = extractor(&det);
        x.observe(&line("01-01 10:00:10.000 1 1 I Moonlight: orientation changed"));
        let focus = x.finish();
        assert_eq!(focus.counters.dropped_no_signal, 1);
        assert!(focus.metrics.is_empty());
    }
}
