//! Report-phase driver: ingests one capture directory, runs every
//! parser and the correlation engine, and hands the result to the
//! report emitter.
//!
//! The phase is single-threaded and deterministic. Logcat is streamed
//! twice (no whole-file buffering): pass one feeds the stream-session
//! detector, pass two feeds the classifier and the app-focus extractor
//! with the session result available for phase resolution.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::appfocus::{AppFocus, AppFocusExtractor, NoisePolicy};
use crate::capture::manifest::CaptureMeta;
use crate::correlate::bidir::{self, BidirReport};
use crate::correlate::causes::{rank_causes, CauseInputs, CauseScore};
use crate::correlate::{
    build_timeline, derive_wakelock_spikes, interval_stats, jitter_hit_ratios, prepost_alignment,
    top_periodic_events, AlignmentStat, IntervalStat, JitterHitRatio, PeriodicEvent, Timeline,
};
use crate::dumpsys::{TransitionDetector, SERVICES};
use crate::error::{Error, Result};
use crate::event::{Event, EventSource, EventStore, EventType};
use crate::logcat::LogcatClassifier;
use crate::ping::nping::HostPingParser;
use crate::ping::{DevicePingParser, PingFocus};
use crate::report::{self, ReportPaths};
use crate::session::{SessionBuffers, SessionDetector, StreamDetection, WindowMode};
use crate::snapshot::SnapshotReader;
use crate::timeparse::{minute_floor, parse_threadtime, EpochMs, YearAnchor};

/// Behavior when no valid streaming session is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoValidSessionPolicy {
    EmptyMain,
    Degraded,
}

impl NoValidSessionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty-main" => Some(NoValidSessionPolicy::EmptyMain),
            "degraded" => Some(NoValidSessionPolicy::Degraded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoValidSessionPolicy::EmptyMain => "empty-main",
            NoValidSessionPolicy::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub dir: PathBuf,
    pub mode: WindowMode,
    pub noise_policy: NoisePolicy,
    pub buffers: SessionBuffers,
    pub no_valid_policy: NoValidSessionPolicy,
}

/// Everything one report run derived; the report emitter consumes this
/// read-only.
#[derive(Debug)]
pub struct Analysis {
    pub dir: PathBuf,
    pub generated_at_iso: String,
    pub capture_start: EpochMs,
    pub capture_end: EpochMs,
    pub detection: StreamDetection,
    pub degraded: bool,
    pub noise_policy: NoisePolicy,
    pub no_valid_policy: NoValidSessionPolicy,
    pub store: EventStore,
    pub app: AppFocus,
    pub device_ping: PingFocus,
    pub host_ping: PingFocus,
    pub timeline: Timeline,
    pub intervals: Vec<IntervalStat>,
    pub intervals_session: Vec<IntervalStat>,
    pub periodic: Vec<PeriodicEvent>,
    pub alignment: Vec<AlignmentStat>,
    pub jitter_ratios: Vec<JitterHitRatio>,
    pub causes: Vec<CauseScore>,
    pub bidir: BidirReport,
    pub logcat_lines: u64,
    pub classifier_drops: u64,
    pub logcat_drop_reasons: BTreeMap<String, u64>,
    pub missing_optional: Vec<String>,
    pub events_in_session: u64,
    pub events_outside: u64,
}

/// Compact result returned to the binary.
#[derive(Debug)]
pub struct ReportOutcome {
    pub paths: ReportPaths,
    pub dir: PathBuf,
    pub has_valid_session: bool,
    pub degraded: bool,
    pub top_cause: Option<(String, f64)>,
    pub window_count: usize,
}

fn for_each_line<F: FnMut(&str)>(path: &Path, mut f: F) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        f(&line);
    }
    Ok(())
}

pub fn run_report(opts: &ReportOptions) -> Result<ReportOutcome> {
    let dir = &opts.dir;
    let logcat_path = dir.join("logcat_all.log");
    if !logcat_path.exists() {
        return Err(Error::MissingInput(logcat_path));
    }

    let meta = match CaptureMeta::read(&CaptureMeta::path_in(dir)) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "capture manifest unreadable, falling back to logcat range");
            None
        }
    };
    let manifest_start = meta
        .as_ref()
        .and_then(|m| crate::timeparse::parse_iso(&m.started_at_iso));
    let manifest_end = meta
        .as_ref()
        .and_then(|m| m.stopped_at_iso.as_deref())
        .and_then(crate::timeparse::parse_iso);
    let anchor = match manifest_start {
        Some(start) => YearAnchor::from_capture_range(start, manifest_end),
        None => YearAnchor::current(),
    };

    // Pass 1: session detection + logcat time range.
    let mut detector = SessionDetector::new();
    let mut logcat_lines: u64 = 0;
    let mut min_ts: Option<EpochMs> = None;
    let mut max_ts: Option<EpochMs> = None;
    for_each_line(&logcat_path, |raw| {
        logcat_lines += 1;
        if let Some(line) = parse_threadtime(raw, &anchor) {
            min_ts = Some(min_ts.map_or(line.ts, |m: i64| m.min(line.ts)));
            max_ts = Some(max_ts.map_or(line.ts, |m: i64| m.max(line.ts)));
            detector.observe(&line);
        }
    })?;

    let capture_start = manifest_start.or(min_ts).unwrap_or(0);
    let capture_end = manifest_end.or(max_ts).unwrap_or(capture_start);
    let detection = detector.finish(opts.mode, opts.buffers, capture_start, capture_end);
    let degraded =
        !detection.has_valid_session() && opts.no_valid_policy == NoValidSessionPolicy::Degraded;
    info!(
        windows = detection.windows.len(),
        valid = detection.has_valid_session(),
        degraded,
        "stream detection complete"
    );

    // Pass 2: classification + app focus.
    let mut classifier = LogcatClassifier::new();
    let mut store = EventStore::new();
    let mut wakelock_hits: BTreeMap<EpochMs, u64> = BTreeMap::new();
    let mut extractor = AppFocusExtractor::new(&detection, opts.noise_policy);
    for_each_line(&logcat_path, |raw| {
        let Some(line) = parse_threadtime(raw, &anchor) else {
            return;
        };
        if let Some(classification) = classifier.classify(&line) {
            for ty in &classification.types {
                store.insert(Event {
                    ty: *ty,
                    ts: line.ts,
                    source: EventSource::Logcat,
                    raw_line: Some(line.message.clone()),
                });
            }
            if classification.wakelock_hit {
                *wakelock_hits.entry(minute_floor(line.ts)).or_default() += 1;
            }
        }
        extractor.observe(&line);
    })?;
    let app = extractor.finish();

    // Dumpsys transition streams; missing files are recorded, not fatal.
    let mut transitions = TransitionDetector::new();
    let mut missing_optional = Vec::new();
    for service in SERVICES {
        let path = dir.join(format!("dumpsys_{service}.log"));
        if !path.exists() {
            missing_optional.push(path.file_name().and_then(|n| n.to_str()).unwrap_or(service).to_string());
            continue;
        }
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        for frame in SnapshotReader::new(BufReader::new(file)) {
            let snap = frame.map_err(|e| Error::io(&path, e))?;
            transitions.observe(&snap, &mut store);
        }
    }
    debug!(
        skipped_non_ok = transitions.skipped_non_ok,
        "dumpsys transition pass complete"
    );

    derive_wakelock_spikes(&wakelock_hits, capture_start, capture_end, &mut store);

    // Ping logs.
    let device_interval = meta.as_ref().map(|m| m.ping.interval_sec).unwrap_or(0.2);
    let host_interval = meta
        .as_ref()
        .map(|m| m.host_side_ping.interval_sec)
        .filter(|&i| i > 0.0)
        .unwrap_or(0.2);
    let device_ping = {
        let path = dir.join("ping_host.log");
        if path.exists() {
            let mut parser = DevicePingParser::new(Some(capture_start), device_interval);
            for_each_line(&path, |raw| parser.push_line(raw))?;
            parser.finish(&detection)
        } else {
            missing_optional.push("ping_host.log".to_string());
            PingFocus::empty("device_side_ping", device_interval)
        }
    };
    let host_ping = {
        let path = dir.join("ping_host_side.log");
        if path.exists() {
            let mut parser = HostPingParser::new(host_interval);
            for_each_line(&path, |raw| parser.push_line(raw))?;
            parser.finish(&detection)
        } else {
            missing_optional.push("ping_host_side.log".to_string());
            PingFocus::empty("host_side_ping", host_interval)
        }
    };

    // Correlation.
    let timeline = build_timeline(&store, capture_start, capture_end);
    let intervals = interval_stats(&store);
    let intervals_session = {
        let mut session_store = EventStore::new();
        for ty in EventType::ALL {
            for event in store.events_of(ty) {
                if detection.in_session(event.ts) {
                    session_store.insert(event.clone());
                }
            }
        }
        interval_stats(&session_store)
    };
    let periodic = top_periodic_events(&store);
    let alignment = prepost_alignment(&store);
    let jitter_points = device_ping.jitter_points();
    let jitter_ratios = jitter_hit_ratios(&store, &jitter_points);
    let causes = rank_causes(&CauseInputs {
        app: &app,
        device_ping: &device_ping,
        store: &store,
        degraded,
    });
    let bidir = bidir::analyze(&device_ping, &host_ping);

    let mut events_in_session = 0u64;
    let mut events_outside = 0u64;
    for ty in EventType::ALL {
        for &ts in store.timestamps(ty) {
            if detection.in_session(ts) {
                events_in_session += 1;
            } else {
                events_outside += 1;
            }
        }
    }

    let logcat_drop_reasons: BTreeMap<String, u64> = classifier
        .drop_counts()
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
    let classifier_drops = classifier.lines_dropped;

    let analysis = Analysis {
        dir: dir.clone(),
        generated_at_iso: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        capture_start,
        capture_end,
        detection,
        degraded,
        noise_policy: opts.noise_policy,
        no_valid_policy: opts.no_valid_policy,
        store,
        app,
        device_ping,
        host_ping,
        timeline,
        intervals,
        intervals_session,
        periodic,
        alignment,
        jitter_ratios,
        causes,
        bidir,
        logcat_lines,
        classifier_drops,
        logcat_drop_reasons,
        missing_optional,
        events_in_session,
        events_outside,
    };

    let paths = report::write_all(&analysis)?;
    info!(dir = %dir.display(), "report written");

    Ok(ReportOutcome {
        paths,
        dir: dir.clone(),
        has_valid_session: analysis.detection.has_valid_session(),
        degraded: analysis.degraded,
        top_cause: analysis
            .causes
            .first()
            .map(|c| (c.cause.as_str().to_string(), c.score)),
        window_count: analysis.detection.windows.len(),
    })
}
