//! CSV serializers. Every table is column-ordered with a header row;
//! timestamps are formatted as `YYYY-MM-DD HH:mm:ss.SSS`.

use std::path::{Path, PathBuf};

use crate::analyze::Analysis;
use crate::error::{Error, Result};
use crate::event::EventType;
use crate::ping::PingFocus;
use crate::timeparse::fmt_ts;
use crate::util::f2;

use super::files;

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    Ok(csv::Writer::from_writer(file))
}

fn finish(mut w: csv::Writer<std::fs::File>, path: &Path) -> Result<()> {
    w.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// `timeline.csv` / `timeline_session.csv`: one row per minute, one
/// column per event type. The session variant keeps only minutes that
/// intersect an effective window.
pub fn write_timeline(analysis: &Analysis, dir: &Path, session_only: bool) -> Result<PathBuf> {
    let name = if session_only {
        files::TIMELINE_SESSION
    } else {
        files::TIMELINE
    };
    let path = dir.join(name);
    let mut w = open_writer(&path)?;

    let mut header = vec!["minute".to_string()];
    header.extend(EventType::ALL.iter().map(|t| t.name().to_string()));
    w.write_record(&header).map_err(|e| Error::csv(&path, e))?;

    for row in &analysis.timeline.rows {
        if session_only {
            let minute_end = row.minute_start + 59_999;
            let overlaps = analysis
                .detection
                .effective
                .iter()
                .any(|win| row.minute_start <= win.end_ts && win.start_ts <= minute_end);
            if !overlaps {
                continue;
            }
        }
        let mut record = vec![row.minute.clone()];
        record.extend(row.counts.iter().map(|c| c.to_string()));
        w.write_record(&record).map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `intervals.csv` / `intervals_session.csv`.
pub fn write_intervals(analysis: &Analysis, dir: &Path, session_only: bool) -> Result<PathBuf> {
    let (name, stats) = if session_only {
        (files::INTERVALS_SESSION, &analysis.intervals_session)
    } else {
        (files::INTERVALS, &analysis.intervals)
    };
    let path = dir.join(name);
    let mut w = open_writer(&path)?;
    w.write_record(["event_type", "count", "p25_s", "p50_s", "p75_s", "top_bins"])
        .map_err(|e| Error::csv(&path, e))?;
    for s in stats {
        let bins = s
            .top_bins
            .iter()
            .map(|(start, count)| format!("{start}s:{count}"))
            .collect::<Vec<_>>()
            .join("|");
        w.write_record([
            s.event_type.to_string(),
            s.count.to_string(),
            f2(s.p25_s),
            f2(s.p50_s),
            f2(s.p75_s),
            bins,
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `stream_windows.csv`: the raw scored windows.
pub fn write_stream_windows(analysis: &Analysis, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(files::STREAM_WINDOWS);
    let mut w = open_writer(&path)?;
    w.write_record([
        "id",
        "start_ts",
        "end_ts",
        "duration_s",
        "has_strong_start",
        "has_start_marker",
        "has_end_marker",
        "start_marker_count",
        "end_marker_count",
        "activity_count",
        "score",
        "valid",
    ])
    .map_err(|e| Error::csv(&path, e))?;
    for win in &analysis.detection.windows {
        w.write_record([
            win.id.to_string(),
            fmt_ts(win.start_ts),
            fmt_ts(win.end_ts),
            f2(win.duration_ms() as f64 / 1000.0),
            win.has_strong_start.to_string(),
            win.has_start_marker.to_string(),
            win.has_end_marker.to_string(),
            win.start_marker_count.to_string(),
            win.end_marker_count.to_string(),
            win.activity_count.to_string(),
            f2(win.score),
            win.valid.to_string(),
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `stream_windows_effective.csv`: buffered, merged windows.
pub fn write_effective_windows(analysis: &Analysis, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(files::STREAM_WINDOWS_EFFECTIVE);
    let mut w = open_writer(&path)?;
    w.write_record(["id", "start_ts", "end_ts", "duration_s"])
        .map_err(|e| Error::csv(&path, e))?;
    for win in &analysis.detection.effective {
        w.write_record([
            win.id.to_string(),
            fmt_ts(win.start_ts),
            fmt_ts(win.end_ts),
            f2((win.end_ts - win.start_ts) as f64 / 1000.0),
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `app_metrics.csv`: one row per extracted metric sample.
pub fn write_app_metrics(analysis: &Analysis, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(files::APP_METRICS);
    let mut w = open_writer(&path)?;
    w.write_record([
        "ts",
        "metric",
        "value",
        "unit",
        "phase",
        "in_session",
        "confidence",
        "metric_source",
    ])
    .map_err(|e| Error::csv(&path, e))?;
    for m in &analysis.app.metrics {
        w.write_record([
            fmt_ts(m.ts),
            m.metric.to_string(),
            format!("{}", m.value),
            m.unit.to_string(),
            m.phase.as_str().to_string(),
            m.in_session.to_string(),
            f2(m.confidence),
            m.metric_source.as_str().to_string(),
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `internal_stats.csv`: the joint per-line INTERNAL_STATS records.
pub fn write_internal_stats(analysis: &Analysis, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(files::INTERNAL_STATS);
    let mut w = open_writer(&path)?;
    w.write_record([
        "ts",
        "fps_total",
        "fps_rx",
        "fps_rd",
        "loss_frames",
        "loss_total",
        "loss_pct",
        "loss_events",
        "rtt_ms",
        "rtt_var_ms",
        "decode_ms",
        "render_ms",
        "total_ms",
        "host_min_ms",
        "host_max_ms",
        "host_avg_ms",
        "decoder",
        "hdr",
        "phase",
        "in_session",
    ])
    .map_err(|e| Error::csv(&path, e))?;
    for s in &analysis.app.internal {
        w.write_record([
            fmt_ts(s.ts),
            format!("{}", s.fps_total),
            format!("{}", s.fps_rx),
            format!("{}", s.fps_rd),
            s.loss_frames.to_string(),
            s.loss_total.to_string(),
            format!("{}", s.loss_pct),
            s.loss_events.to_string(),
            format!("{}", s.rtt_ms),
            format!("{}", s.rtt_var_ms),
            format!("{}", s.decode_ms),
            format!("{}", s.render_ms),
            format!("{}", s.total_ms),
            format!("{}", s.host_min_ms),
            format!("{}", s.host_max_ms),
            format!("{}", s.host_avg_ms),
            s.decoder.clone().unwrap_or_default(),
            s.hdr.map(|h| h.to_string()).unwrap_or_default(),
            s.phase.as_str().to_string(),
            s.in_session.to_string(),
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}

/// `ping_latency*.csv`: one row per sample, full or session-filtered,
/// device or host side.
pub fn write_ping(
    analysis: &Analysis,
    dir: &Path,
    host_side: bool,
    session_only: bool,
) -> Result<PathBuf> {
    let focus: &PingFocus = if host_side {
        &analysis.host_ping
    } else {
        &analysis.device_ping
    };
    let name = match (host_side, session_only) {
        (false, false) => files::PING_LATENCY,
        (false, true) => files::PING_LATENCY_SESSION,
        (true, false) => files::PING_LATENCY_HOST,
        (true, true) => files::PING_LATENCY_HOST_SESSION,
    };
    let path = dir.join(name);
    let mut w = open_writer(&path)?;
    w.write_record([
        "ts",
        "seq",
        "success",
        "latency_ms",
        "status",
        "ts_source",
        "phase",
        "in_session",
    ])
    .map_err(|e| Error::csv(&path, e))?;
    for s in &focus.samples {
        if session_only && !s.in_session {
            continue;
        }
        w.write_record([
            fmt_ts(s.ts),
            s.seq.map(|q| q.to_string()).unwrap_or_default(),
            s.success.to_string(),
            s.latency_ms.map(|l| format!("{l}")).unwrap_or_default(),
            s.status.as_str().to_string(),
            s.ts_source.as_str().to_string(),
            s.phase.as_str().to_string(),
            s.in_session.to_string(),
        ])
        .map_err(|e| Error::csv(&path, e))?;
    }
    finish(w, &path)?;
    Ok(path)
}
