//! Report-phase artifact emission: CSV tables, the Markdown report and
//! the JSON analysis manifest, all derived from one `Analysis` value.

pub mod markdown;
pub mod tables;

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::analyze::Analysis;
use crate::error::{Error, Result};
use crate::timeparse::fmt_iso;
use crate::util::write_atomic;

/// Output file names, fixed by the capture/report data contract.
pub mod files {
    pub const REPORT_MD: &str = "report.md";
    pub const ANALYSIS_META: &str = "analysis_meta.json";
    pub const TIMELINE: &str = "timeline.csv";
    pub const TIMELINE_SESSION: &str = "timeline_session.csv";
    pub const INTERVALS: &str = "intervals.csv";
    pub const INTERVALS_SESSION: &str = "intervals_session.csv";
    pub const STREAM_WINDOWS: &str = "stream_windows.csv";
    pub const STREAM_WINDOWS_EFFECTIVE: &str = "stream_windows_effective.csv";
    pub const APP_FOCUS_LOG: &str = "app_focus.log";
    pub const APP_METRICS: &str = "app_metrics.csv";
    pub const INTERNAL_STATS: &str = "internal_stats.csv";
    pub const PING_LATENCY: &str = "ping_latency.csv";
    pub const PING_LATENCY_SESSION: &str = "ping_latency_session.csv";
    pub const PING_LATENCY_HOST: &str = "ping_latency_host_side.csv";
    pub const PING_LATENCY_HOST_SESSION: &str = "ping_latency_host_side_session.csv";
}

/// Every artifact written by one report run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub report_md: PathBuf,
    pub analysis_meta: PathBuf,
    pub csv_files: Vec<PathBuf>,
    pub app_focus_log: PathBuf,
}

/// Writes all artifacts into the capture directory.
pub fn write_all(analysis: &Analysis) -> Result<ReportPaths> {
    let dir = &analysis.dir;
    let mut csv_files = Vec::new();

    csv_files.push(tables::write_timeline(analysis, dir, false)?);
    csv_files.push(tables::write_timeline(analysis, dir, true)?);
    csv_files.push(tables::write_intervals(analysis, dir, false)?);
    csv_files.push(tables::write_intervals(analysis, dir, true)?);
    csv_files.push(tables::write_stream_windows(analysis, dir)?);
    csv_files.push(tables::write_effective_windows(analysis, dir)?);
    csv_files.push(tables::write_app_metrics(analysis, dir)?);
    csv_files.push(tables::write_internal_stats(analysis, dir)?);
    csv_files.push(tables::write_ping(analysis, dir, false, false)?);
    csv_files.push(tables::write_ping(analysis, dir, false, true)?);
    csv_files.push(tables::write_ping(analysis, dir, true, false)?);
    csv_files.push(tables::write_ping(analysis, dir, true, true)?);

    let app_focus_log = dir.join(files::APP_FOCUS_LOG);
    let mut body = analysis.app.kept_lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    write_atomic(&app_focus_log, body.as_bytes())?;

    let report_md = dir.join(files::REPORT_MD);
    write_atomic(&report_md, markdown::render(analysis).as_bytes())?;

    let analysis_meta = dir.join(files::ANALYSIS_META);
    let meta = build_manifest(analysis, &csv_files);
    let pretty =
        serde_json::to_vec_pretty(&meta).map_err(|e| Error::json(&analysis_meta, e))?;
    write_atomic(&analysis_meta, &pretty)?;

    Ok(ReportPaths {
        report_md,
        analysis_meta,
        csv_files,
        app_focus_log,
    })
}

/// The analysis manifest mirrors every derived number the Markdown
/// report shows, plus provenance.
fn build_manifest(analysis: &Analysis, csv_files: &[PathBuf]) -> serde_json::Value {
    let det = &analysis.detection;
    let per_type: BTreeMap<&str, usize> = analysis.store.counts_by_type();

    let session_counts = json!({
        "eventsTotal": analysis.store.total(),
        "eventsSuppressed": analysis.store.suppressed_total(),
        "eventsInSession": analysis.events_in_session,
        "eventsOutsideSession": analysis.events_outside,
        "logcatLines": analysis.logcat_lines,
        "logcatDropped": analysis.classifier_drops,
        "perType": per_type,
        "appMetrics": analysis.app.metrics.len(),
        "appInternalStats": analysis.app.internal.len(),
        "appAnomalies": analysis.app.anomalies.len(),
        "devicePingSamples": analysis.device_ping.samples.len(),
        "devicePingSkippedNoTs": analysis.device_ping.skipped_no_ts,
        "hostPingSamples": analysis.host_ping.samples.len(),
        "hostPingSkippedNoTs": analysis.host_ping.skipped_no_ts,
        "bidirPairedCount": analysis.bidir.paired_count,
        "bidirUnpairedDevice": analysis.bidir.unpaired_device,
        "bidirUnpairedHost": analysis.bidir.unpaired_host,
    });

    let session_block = json!({
        "mode": det.mode.as_str(),
        "noisePolicy": analysis.noise_policy.as_str(),
        "noValidSessionPolicy": analysis.no_valid_policy.as_str(),
        "available": det.has_valid_session(),
        "noValidReason": if det.has_valid_session() {
            serde_json::Value::Null
        } else {
            json!(no_valid_reason(analysis))
        },
        "degraded": analysis.degraded,
        "preBufferSec": det.buffers.pre_buffer_sec,
        "postBufferSec": det.buffers.post_buffer_sec,
        "clockSkewToleranceSec": det.buffers.clock_skew_tolerance_sec,
        "windows": det.windows,
        "effectiveWindows": det.effective,
    });

    json!({
        "version": 3,
        "generatedAtIso": analysis.generated_at_iso,
        "captureStartIso": fmt_iso(analysis.capture_start),
        "captureEndIso": fmt_iso(analysis.capture_end),
        "counts": session_counts,
        "session": session_block,
        "intervalStats": analysis.intervals,
        "intervalStatsSession": analysis.intervals_session,
        "topPeriodicEvents": analysis.periodic,
        "prePostAlignment": analysis.alignment,
        "jitterHitRatios": analysis.jitter_ratios,
        "causeRanking": analysis.causes,
        "bidirectional": analysis.bidir,
        "devicePing": ping_summary_json(analysis, true),
        "hostPing": ping_summary_json(analysis, false),
        "noiseReduction": {
            "logcatDropsByReason": analysis.logcat_drop_reasons,
            "appFocus": analysis.app.counters,
        },
        "missingOptional": analysis.missing_optional,
        "files": csv_files
            .iter()
            .chain(std::iter::once(&analysis.dir.join(files::REPORT_MD)))
            .map(|p| p.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string())
            .collect::<Vec<_>>(),
    })
}

fn ping_summary_json(analysis: &Analysis, device: bool) -> serde_json::Value {
    let focus = if device {
        &analysis.device_ping
    } else {
        &analysis.host_ping
    };
    json!({
        "source": focus.source,
        "intervalSec": focus.interval_sec,
        "samples": focus.samples.len(),
        "success": focus.success_count(),
        "lossRatePct": focus.loss_rate_pct(),
        "thresholdMs": focus.threshold_ms,
        "p95LatencyMs": focus.p95_latency(),
        "p95DeltaMs": focus.p95_delta(),
        "highLatencyEvents": focus.high_latency_idx.len(),
        "bursts": focus.bursts.len(),
        "jitterEvents": focus.jitter_events.len(),
        "skippedNoTs": focus.skipped_no_ts,
        "summary": focus.summary,
    })
}

pub(crate) fn no_valid_reason(analysis: &Analysis) -> &'static str {
    let det = &analysis.detection;
    if det.client_lines == 0 {
        "no_streaming_client_lines"
    } else if det.windows.is_empty() {
        "no_start_markers"
    } else {
        "windows_failed_validity_gate"
    }
}

/// Resolves `logs/<YYYYMMDD_HHmmss>` directories under a root and picks
/// the newest (lexicographically greatest) one.
pub fn latest_capture_dir(root: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let path = entry.path();
        if path.is_dir()
            && (path.join("capture_meta.json").exists() || path.join("logcat_all.log").exists())
        {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| Error::NoCaptureDir(root.to_path_buf()))
}
