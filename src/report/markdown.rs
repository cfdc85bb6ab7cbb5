//! Markdown report builder.

use std::fmt::Write as _;

use crate::analyze::{Analysis, NoValidSessionPolicy};
use crate::stats::quantile;
use crate::timeparse::fmt_ts;
use crate::util::{f1, f2};

use super::no_valid_reason;

/// Renders the full Markdown report for one analysis.
pub fn render(analysis: &Analysis) -> String {
    let mut out = String::with_capacity(16 * 1024);
    let det = &analysis.detection;

    let _ = writeln!(out, "# Stream jitter diagnosis");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Capture range: `{}` .. `{}`",
        fmt_ts(analysis.capture_start),
        fmt_ts(analysis.capture_end)
    );
    let _ = writeln!(out, "- Generated: `{}`", analysis.generated_at_iso);
    let _ = writeln!(
        out,
        "- Window mode `{}`, noise policy `{}`",
        det.mode.as_str(),
        analysis.noise_policy.as_str()
    );
    let _ = writeln!(out);

    if analysis.degraded {
        let _ = writeln!(
            out,
            "> **Degraded analysis**: no confirmed streaming session was found. \
             All cause scores below are multiplied by 0.7 and every confidence is low."
        );
        let _ = writeln!(out);
    }

    // Availability statement.
    let _ = writeln!(out, "## Availability");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Logcat lines: {} (classifier dropped {})",
        analysis.logcat_lines, analysis.classifier_drops
    );
    let _ = writeln!(
        out,
        "- Device ping samples: {} / host-side ping samples: {}",
        analysis.device_ping.samples.len(),
        analysis.host_ping.samples.len()
    );
    if !analysis.missing_optional.is_empty() {
        let _ = writeln!(
            out,
            "- Missing optional inputs: {}",
            analysis.missing_optional.join(", ")
        );
    }
    let _ = writeln!(out);

    if !det.has_valid_session() && analysis.no_valid_policy == NoValidSessionPolicy::EmptyMain {
        render_no_session(&mut out, analysis);
    } else {
        render_sessions(&mut out, analysis);
        render_internal_stats(&mut out, analysis);
        render_ping(&mut out, analysis);
        render_causes(&mut out, analysis);
    }

    render_counters_appendix(&mut out, analysis);
    render_noise_appendix(&mut out, analysis);
    out
}

fn render_no_session(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## No streaming session detected");
    let _ = writeln!(out);
    let _ = writeln!(out, "Reason: `{}`.", no_valid_reason(analysis));
    let _ = writeln!(out);
    let _ = writeln!(out, "Suggestions for the next capture:");
    let _ = writeln!(out, "- Start the capture before launching the streaming client.");
    let _ = writeln!(out, "- Keep the session running for at least 20 seconds.");
    let _ = writeln!(
        out,
        "- Verify the client emits `[INTERNAL_STATS]` lines (enable its performance overlay)."
    );
    let _ = writeln!(
        out,
        "- Re-run the report with `--stream-window-mode all` to inspect rejected windows."
    );
    let _ = writeln!(out);
}

fn render_sessions(out: &mut String, analysis: &Analysis) {
    let det = &analysis.detection;
    let _ = writeln!(out, "## Stream sessions");
    let _ = writeln!(out);
    if det.windows.is_empty() {
        let _ = writeln!(out, "No windows were detected.");
        let _ = writeln!(out);
        return;
    }
    let _ = writeln!(
        out,
        "| id | start | end | dur (s) | strong | markers | activity | score | valid |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|");
    for w in &det.windows {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {}/{} | {} | {} | {} |",
            w.id,
            fmt_ts(w.start_ts),
            fmt_ts(w.end_ts),
            f1(w.duration_ms() as f64 / 1000.0),
            w.has_strong_start,
            w.start_marker_count,
            w.end_marker_count,
            w.activity_count,
            f2(w.score),
            w.valid
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Effective windows (buffered and merged):");
    let _ = writeln!(out);
    for w in &det.effective {
        let _ = writeln!(
            out,
            "- #{}: `{}` .. `{}`",
            w.id,
            fmt_ts(w.start_ts),
            fmt_ts(w.end_ts)
        );
    }
    let _ = writeln!(out);
}

fn render_internal_stats(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## In-session INTERNAL_STATS");
    let _ = writeln!(out);
    let in_session: Vec<_> = analysis
        .app
        .internal
        .iter()
        .filter(|s| s.in_session)
        .collect();
    if in_session.is_empty() {
        let _ = writeln!(out, "No in-session INTERNAL_STATS records.");
        let _ = writeln!(out);
        return;
    }
    let _ = writeln!(out, "| metric | count | min | p50 | p95 | max | avg |");
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    let metrics: [(&str, fn(&crate::appfocus::InternalStatsSample) -> f64); 8] = [
        ("fps_total", |s| s.fps_total),
        ("loss_pct", |s| s.loss_pct),
        ("rtt_ms", |s| s.rtt_ms),
        ("rtt_var_ms", |s| s.rtt_var_ms),
        ("decode_ms", |s| s.decode_ms),
        ("render_ms", |s| s.render_ms),
        ("total_ms", |s| s.total_ms),
        ("host_avg_ms", |s| s.host_avg_ms),
    ];
    for (name, get) in metrics {
        let mut values: Vec<f64> = in_session.iter().map(|&s| get(s)).collect();
        values.sort_by(|a, b| a.partial_cmp(b).expect("values are finite"));
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            name,
            values.len(),
            f2(values[0]),
            f2(quantile(&values, 0.5)),
            f2(quantile(&values, 0.95)),
            f2(*values.last().expect("non-empty")),
            f2(avg)
        );
    }
    // Peak rows: the worst total_ms observations.
    let mut peaks: Vec<_> = in_session.iter().collect();
    peaks.sort_by(|a, b| b.total_ms.partial_cmp(&a.total_ms).expect("finite"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Peak pipeline times:");
    for s in peaks.iter().take(3) {
        let _ = writeln!(
            out,
            "- {}: total={}ms decode={}ms render={}ms rtt={}ms loss={}%",
            fmt_ts(s.ts),
            f1(s.total_ms),
            f1(s.decode_ms),
            f1(s.render_ms),
            f1(s.rtt_ms),
            f2(s.loss_pct)
        );
    }
    let _ = writeln!(out);
}

fn render_ping(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Ping (in-session)");
    let _ = writeln!(out);
    for focus in [&analysis.device_ping, &analysis.host_ping] {
        let in_session = focus.samples.iter().filter(|s| s.in_session).count();
        let _ = writeln!(
            out,
            "- `{}`: {} samples ({} in session), loss {}%, threshold {} ms, \
             {} high-latency events, {} bursts, {} jitter events",
            focus.source,
            focus.samples.len(),
            in_session,
            f2(focus.loss_rate_pct()),
            f1(focus.threshold_ms),
            focus.high_latency_idx.len(),
            focus.bursts.len(),
            focus.jitter_events.len()
        );
    }
    let _ = writeln!(out);
    if !analysis.jitter_ratios.is_empty() {
        let _ = writeln!(out, "System events near device jitter points:");
        let _ = writeln!(out);
        for r in analysis.jitter_ratios.iter().take(5) {
            let _ = writeln!(
                out,
                "- {}: hit ratio {} ({} nearby)",
                r.event_type,
                f2(r.hit_ratio),
                r.total_near
            );
        }
        let _ = writeln!(out);
    }
    // Auto findings from the bidirectional comparison.
    let bidir = &analysis.bidir;
    let _ = writeln!(
        out,
        "Bidirectional: direction `{}` (confidence {}), burst overlap {}, \
         {} paired samples, mean signed delta {} ms",
        bidir.direction.as_str(),
        bidir.confidence.as_str(),
        f2(bidir.burst_overlap_ratio),
        bidir.paired_count,
        f2(bidir.mean_signed_delta_ms)
    );
    if !bidir.findings.is_empty() {
        for finding in &bidir.findings {
            let _ = writeln!(out, "- finding: `{finding}`");
        }
    }
    let _ = writeln!(out);
}

fn render_causes(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Cause ranking");
    let _ = writeln!(out);
    for (rank, cause) in analysis.causes.iter().take(3).enumerate() {
        let _ = writeln!(
            out,
            "### {}. `{}` — score {} ({}, confidence {})",
            rank + 1,
            cause.cause.as_str(),
            f2(cause.score),
            cause.level.as_str(),
            cause.confidence.as_str()
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "overlap {} / lead-lag {} / intensity {}",
            f2(cause.overlap),
            f2(cause.lead_lag),
            f2(cause.intensity)
        );
        let _ = writeln!(out);
        for row in &cause.evidence {
            match (row.ts, row.value) {
                (Some(ts), Some(v)) => {
                    let _ = writeln!(out, "- {} `{}`={} — {}", fmt_ts(ts), row.metric, f2(v), row.detail);
                }
                (None, Some(v)) => {
                    let _ = writeln!(out, "- `{}`={} — {}", row.metric, f2(v), row.detail);
                }
                _ => {
                    let _ = writeln!(out, "- `{}` — {}", row.metric, row.detail);
                }
            }
        }
        let _ = writeln!(out);
    }
}

fn render_counters_appendix(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Appendix: full vs session counters");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Events: {} total, {} in session, {} outside ({} suppressed as near-duplicates)",
        analysis.store.total(),
        analysis.events_in_session,
        analysis.events_outside,
        analysis.store.suppressed_total()
    );
    let _ = writeln!(out);
    let counts = analysis.store.counts_by_type();
    if !counts.is_empty() {
        let _ = writeln!(out, "| type | count |");
        let _ = writeln!(out, "|---|---|");
        for (name, count) in counts {
            let _ = writeln!(out, "| {name} | {count} |");
        }
        let _ = writeln!(out);
    }
    if !analysis.periodic.is_empty() {
        let _ = writeln!(out, "Top periodic event types:");
        for p in &analysis.periodic {
            let _ = writeln!(
                out,
                "- {}: best period {} s (ratio {}, score {})",
                p.event_type,
                f1(p.best_period_s),
                f2(p.best_ratio),
                f2(p.score)
            );
        }
        let _ = writeln!(out);
    }
    let increased: Vec<_> = analysis.alignment.iter().filter(|a| a.increased).collect();
    if !increased.is_empty() {
        let _ = writeln!(out, "Transitions followed by a network-event increase:");
        for a in increased {
            let _ = writeln!(
                out,
                "- {}: pre {} -> post {} (x{})",
                a.transition,
                a.pre_count,
                a.post_count,
                f2(a.ratio)
            );
        }
        let _ = writeln!(out);
    }
}

fn render_noise_appendix(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Appendix: noise reduction");
    let _ = writeln!(out);
    let mut reasons: Vec<(&String, &u64)> = analysis.logcat_drop_reasons.iter().collect();
    reasons.sort_by(|a, b| b.1.cmp(a.1));
    if reasons.is_empty() {
        let _ = writeln!(out, "No logcat lines were dropped.");
    } else {
        for (reason, count) in reasons.iter().take(5) {
            let _ = writeln!(out, "- `{reason}`: {count} lines");
        }
    }
    let counters = &analysis.app.counters;
    let _ = writeln!(
        out,
        "- app focus: {} client lines, {} kept, {} app-noise drops, {} preconnect-poll drops, {} no-signal drops",
        counters.client_lines,
        counters.kept_lines,
        counters.dropped_app_noise,
        counters.dropped_preconnect_poll,
        counters.dropped_no_signal
    );
    let _ = writeln!(out);
}
