//! Four-hypothesis cause ranking.
//!
//! Each cause receives overlap/leadLag/intensity features in `[0, 1]`
//! built from near-point counts around ping jitter anchors, and a
//! weighted total `0.5*overlap + 0.3*leadLag + 0.2*intensity`. In
//! degraded mode (analysis outside a confirmed session) every final
//! score is multiplied by 0.7 and confidence is forced low.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::appfocus::AppFocus;
use crate::event::{EventStore, EventType};
use crate::ping::PingFocus;
use crate::stats::{clamp01, mean, near_points, norm, quantile};
use crate::timeparse::{fmt_ts, EpochMs};

/// Anchor window for all cause features, ms.
const CAUSE_WINDOW_MS: i64 = 1_000;

/// Degraded-mode score multiplier.
pub const DEGRADED_FACTOR: f64 = 0.7;

/// System transition types examined by the interference cause.
const SYSTEM_TYPES: [EventType; 7] = [
    EventType::Disconnect,
    EventType::Dhcp,
    EventType::DozeEnter,
    EventType::DozeExit,
    EventType::IdleEnter,
    EventType::IdleExit,
    EventType::Connect,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    NetworkPathJitter,
    RttVarianceBurst,
    DecodeRenderOverload,
    SystemTransitionInterference,
}

impl CauseKind {
    pub const ALL: [CauseKind; 4] = [
        CauseKind::NetworkPathJitter,
        CauseKind::RttVarianceBurst,
        CauseKind::DecodeRenderOverload,
        CauseKind::SystemTransitionInterference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CauseKind::NetworkPathJitter => "network_path_jitter",
            CauseKind::RttVarianceBurst => "rtt_variance_burst",
            CauseKind::DecodeRenderOverload => "decode_render_overload",
            CauseKind::SystemTransitionInterference => "system_transition_interference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    fn from_score(score: f64) -> Self {
        if score >= 0.70 {
            Level::High
        } else if score >= 0.45 {
            Level::Medium
        } else {
            Level::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<EpochMs>,
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CauseScore {
    pub cause: CauseKind,
    pub overlap: f64,
    pub lead_lag: f64,
    pub intensity: f64,
    pub score: f64,
    pub level: Level,
    pub confidence: Level,
    pub evidence: Vec<EvidenceRow>,
}

/// Everything the model reads. Point slices must be ascending.
pub struct CauseInputs<'a> {
    pub app: &'a AppFocus,
    pub device_ping: &'a PingFocus,
    pub store: &'a EventStore,
    pub degraded: bool,
}

fn raw_score(overlap: f64, lead_lag: f64, intensity: f64) -> f64 {
    clamp01(0.5 * overlap + 0.3 * lead_lag + 0.2 * intensity)
}

fn confidence_from_anchor_count(n: usize) -> Level {
    if n >= 20 {
        Level::High
    } else if n >= 5 {
        Level::Medium
    } else {
        Level::Low
    }
}

/// Deduplicates on `(ts, metric, detail)`, keeps 3..=5 rows, and pads
/// with the feature-breakdown fallback block only when primary
/// evidence is short.
fn shape_evidence(
    mut primary: Vec<EvidenceRow>,
    overlap: f64,
    lead_lag: f64,
    intensity: f64,
) -> Vec<EvidenceRow> {
    let mut seen: BTreeSet<(Option<EpochMs>, String, String)> = BTreeSet::new();
    primary.retain(|row| seen.insert((row.ts, row.metric.clone(), row.detail.clone())));
    primary.truncate(5);
    if primary.len() < 3 {
        let breakdown = [
            ("overlap", overlap),
            ("lead_lag", lead_lag),
            ("intensity", intensity),
        ];
        for (name, value) in breakdown {
            if primary.len() >= 5 {
                break;
            }
            primary.push(EvidenceRow {
                ts: None,
                metric: name.to_string(),
                value: Some(value),
                detail: format!("feature breakdown: {name}={value:.3}"),
            });
        }
    }
    primary
}

fn top_values_with_ts(
    pairs: &mut Vec<(EpochMs, f64)>,
    metric: &str,
    detail: &str,
    k: usize,
) -> Vec<EvidenceRow> {
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("values are finite"));
    pairs
        .iter()
        .take(k)
        .map(|&(ts, value)| EvidenceRow {
            ts: Some(ts),
            metric: metric.to_string(),
            value: Some(value),
            detail: format!("{detail} at {}", fmt_ts(ts)),
        })
        .collect()
}

fn network_path_jitter(inputs: &CauseInputs<'_>) -> CauseScore {
    let anomalies = inputs.app.anomaly_points();
    let jitter = inputs.device_ping.jitter_points();
    let bursts = inputs.device_ping.burst_starts();

    let overlap = clamp01(1.2 * near_points(&anomalies, &jitter, CAUSE_WINDOW_MS).hit_ratio);
    let lead_lag = clamp01(1.2 * near_points(&anomalies, &bursts, CAUSE_WINDOW_MS).hit_ratio);
    let intensity = mean(&[
        norm(inputs.device_ping.loss_rate_pct(), 0.0, 2.0),
        norm(inputs.device_ping.p95_latency(), 12.0, 40.0),
        norm(inputs.device_ping.p95_delta(), 8.0, 60.0),
    ]);

    let mut pairs: Vec<(EpochMs, f64)> = inputs
        .device_ping
        .jitter_events
        .iter()
        .map(|j| (j.ts, j.delta_ms.abs()))
        .collect();
    let primary = top_values_with_ts(&mut pairs, "jitter_delta_ms", "latency step", 5);
    finish_cause(
        CauseKind::NetworkPathJitter,
        overlap,
        lead_lag,
        intensity,
        primary,
        jitter.len(),
        inputs.degraded,
    )
}

fn rtt_variance_burst(inputs: &CauseInputs<'_>) -> CauseScore {
    let jitter = inputs.device_ping.jitter_points();
    let rtt_var_ts = inputs.app.metric_points("rtt_var_ms");
    let near = near_points(&jitter, &rtt_var_ts, CAUSE_WINDOW_MS);

    let overlap = clamp01(near.total as f64 / jitter.len().max(1) as f64);
    let near_values = inputs
        .app
        .metric_values_near("rtt_var_ms", &jitter, CAUSE_WINDOW_MS);
    let p95_latency = inputs.device_ping.p95_latency();
    let denom = if p95_latency > 0.0 { p95_latency } else { 20.0 }.max(1.0);
    let lead_lag = clamp01(mean(&near_values) / denom);
    let all_var = inputs.app.metric_values_sorted("rtt_var_ms");
    let intensity = norm(quantile(&all_var, 0.95), 5.0, 40.0);

    let mut pairs: Vec<(EpochMs, f64)> = inputs
        .app
        .metrics
        .iter()
        .filter(|m| m.metric == "rtt_var_ms")
        .filter(|m| crate::stats::count_in_window(&jitter, m.ts - CAUSE_WINDOW_MS, m.ts + CAUSE_WINDOW_MS) > 0)
        .map(|m| (m.ts, m.value))
        .collect();
    let primary = top_values_with_ts(&mut pairs, "rtt_var_ms", "RTT variance near jitter", 5);
    finish_cause(
        CauseKind::RttVarianceBurst,
        overlap,
        lead_lag,
        intensity,
        primary,
        jitter.len(),
        inputs.degraded,
    )
}

fn decode_render_overload(inputs: &CauseInputs<'_>) -> CauseScore {
    const METRICS: [&str; 4] = ["decode_ms", "render_ms", "total_ms", "loss_pct"];
    let jitter = inputs.device_ping.jitter_points();
    let bursts = inputs.device_ping.burst_starts();

    let mut near_total = 0usize;
    let mut combined_ts: Vec<EpochMs> = Vec::new();
    for metric in METRICS {
        let ts = inputs.app.metric_points(metric);
        near_total += near_points(&jitter, &ts, CAUSE_WINDOW_MS).total;
        combined_ts.extend_from_slice(&ts);
    }
    combined_ts.sort_unstable();
    let overlap = clamp01(near_total as f64 / (jitter.len().max(1) as f64 * 1.2));
    let lead_lag = clamp01(near_points(&bursts, &combined_ts, CAUSE_WINDOW_MS).hit_ratio);

    let p95_of = |metric: &str| quantile(&inputs.app.metric_values_sorted(metric), 0.95);
    let pipeline_p95 = p95_of("total_ms").max(p95_of("decode_ms")).max(p95_of("render_ms"));
    let fps_sorted = inputs.app.metric_values_sorted("fps_total");
    let fps_term = if fps_sorted.is_empty() {
        0.0
    } else {
        clamp01((60.0 - quantile(&fps_sorted, 0.5)) / 60.0)
    };
    let intensity = mean(&[
        norm(pipeline_p95, 12.0, 80.0),
        norm(p95_of("loss_pct"), 0.5, 10.0),
        fps_term,
    ]);

    let mut pairs: Vec<(EpochMs, f64)> = inputs
        .app
        .metrics
        .iter()
        .filter(|m| m.metric == "total_ms" || m.metric == "decode_ms" || m.metric == "render_ms")
        .filter(|m| crate::stats::count_in_window(&jitter, m.ts - CAUSE_WINDOW_MS, m.ts + CAUSE_WINDOW_MS) > 0)
        .map(|m| (m.ts, m.value))
        .collect();
    let primary = top_values_with_ts(&mut pairs, "pipeline_ms", "pipeline time near jitter", 5);
    finish_cause(
        CauseKind::DecodeRenderOverload,
        overlap,
        lead_lag,
        intensity,
        primary,
        jitter.len(),
        inputs.degraded,
    )
}

fn system_transition_interference(inputs: &CauseInputs<'_>) -> CauseScore {
    let jitter = inputs.device_ping.jitter_points();
    let mut max_hit_ratio: f64 = 0.0;
    let mut avg_per_anchor: Vec<f64> = Vec::new();
    let mut total_near = 0usize;
    let mut primary: Vec<EvidenceRow> = Vec::new();

    for ty in SYSTEM_TYPES {
        let ts = inputs.store.timestamps(ty);
        let np = near_points(&jitter, ts, CAUSE_WINDOW_MS);
        max_hit_ratio = max_hit_ratio.max(np.hit_ratio);
        avg_per_anchor.push(np.avg_per_anchor);
        total_near += np.total;
        if np.total > 0 {
            // Evidence: the densest co-occurring transition types.
            if let Some(&first) = ts.first() {
                primary.push(EvidenceRow {
                    ts: Some(first),
                    metric: ty.name().to_string(),
                    value: Some(np.total as f64),
                    detail: format!(
                        "{} event(s) of {} within ±1s of jitter",
                        np.total,
                        ty.name()
                    ),
                });
            }
        }
    }

    let overlap = clamp01(max_hit_ratio);
    // Mean per-anchor density across the transition-type set; the
    // (0.01, 0.2) band keeps a single co-occurrence from saturating.
    let lead_lag = norm(mean(&avg_per_anchor), 0.01, 0.2);
    let intensity = norm(total_near as f64, 2.0, 60.0);

    primary.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .expect("evidence values are finite")
    });
    finish_cause(
        CauseKind::SystemTransitionInterference,
        overlap,
        lead_lag,
        intensity,
        primary,
        jitter.len(),
        inputs.degraded,
    )
}

fn finish_cause(
    cause: CauseKind,
    overlap: f64,
    lead_lag: f64,
    intensity: f64,
    primary: Vec<EvidenceRow>,
    anchor_count: usize,
    degraded: bool,
) -> CauseScore {
    let raw = raw_score(overlap, lead_lag, intensity);
    let score = if degraded { raw * DEGRADED_FACTOR } else { raw };
    let confidence = if degraded {
        Level::Low
    } else {
        confidence_from_anchor_count(anchor_count)
    };
    CauseScore {
        cause,
        overlap,
        lead_lag,
        intensity,
        score,
        level: Level::from_score(score),
        confidence,
        evidence: shape_evidence(primary, overlap, lead_lag, intensity),
    }
}

/// Scores all four causes, ranked by score descending.
pub fn rank_causes(inputs: &CauseInputs<'_>) -> Vec<CauseScore> {
    let mut scores = vec![
        network_path_jitter(inputs),
        rtt_variance_burst(inputs),
        decode_render_overload(inputs),
        system_transition_interference(inputs),
    ];
    scores.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appfocus::{AppFocusCounters, MetricSource};
    use crate::event::{Event, EventSource};
    use crate::ping::{JitterEvent, PingFocus};
    use crate::session::Phase;

    fn empty_app() -> AppFocus {
        AppFocus {
            metrics: Vec::new(),
            internal: Vec::new(),
            anomalies: Vec::new(),
            kept_lines: Vec::new(),
            counters: AppFocusCounters::default(),
        }
    }

    fn jitter_at(ts: EpochMs) -> JitterEvent {
        JitterEvent {
            ts,
            seq: None,
            latency_ms: 20.0,
            prev_latency_ms: 10.0,
            delta_ms: 10.0,
            phase: Phase::Stream,
            in_session: true,
        }
    }

    #[test]
    fn weighted_score_formula_holds() {
        let s = finish_cause(CauseKind::NetworkPathJitter, 0.8, 0.5, 0.25, Vec::new(), 10, false);
        assert!((s.score - (0.5 * 0.8 + 0.3 * 0.5 + 0.2 * 0.25)).abs() < 1e-9);
        assert_eq!(s.level, Level::Medium);
    }

    #[test]
    fn degraded_multiplies_by_point_seven() {
        let normal = finish_cause(CauseKind::NetworkPathJitter, 0.8, 0.5, 0.25, Vec::new(), 10, false);
        let degraded = finish_cause(CauseKind::NetworkPathJitter, 0.8, 0.5, 0.25, Vec::new(), 10, true);
        assert!((degraded.score - normal.score * DEGRADED_FACTOR).abs() < 1e-9);
        assert_eq!(degraded.confidence, Level::Low);
    }

    #[test]
    fn evidence_always_three_to_five_rows() {
        let s = finish_cause(CauseKind::RttVarianceBurst, 0.1, 0.1, 0.1, Vec::new(), 1, false);
        assert_eq!(s.evidence.len(), 3);
        let many: Vec<EvidenceRow> = (0..8)
            .map(|i| EvidenceRow {
                ts: Some(i),
                metric: "m".into(),
                value: Some(i as f64),
                detail: format!("row {i}"),
            })
            .collect();
        let s = finish_cause(CauseKind::RttVarianceBurst, 0.1, 0.1, 0.1, many, 1, false);
        assert_eq!(s.evidence.len(), 5);
    }

    #[test]
    fn lone_doze_transition_ranks_first_but_low() {
        // Two jitter points, one coinciding DOZE_ENTER, everything
        // else quiet: interference wins with a low level.
        let mut ping = PingFocus::empty("device_side_ping", 0.2);
        ping.jitter_events = vec![jitter_at(100_000), jitter_at(500_000)];
        let app = empty_app();
        let mut store = EventStore::new();
        store.insert(Event {
            ty: EventType::DozeEnter,
            ts: 100_200,
            source: EventSource::Dumpsys("deviceidle".into()),
            raw_line: None,
        });
        let inputs = CauseInputs {
            app: &app,
            device_ping: &ping,
            store: &store,
            degraded: false,
        };
        let ranked = rank_causes(&inputs);
        assert_eq!(ranked[0].cause, CauseKind::SystemTransitionInterference);
        assert!(ranked[0].overlap >= 0.5);
        assert!(ranked[0].score < 0.45);
        assert_eq!(ranked[0].level, Level::Low);

        let degraded_inputs = CauseInputs {
            degraded: true,
            ..inputs
        };
        let degraded = rank_causes(&degraded_inputs);
        for (d, n) in degraded.iter().zip(ranked.iter()) {
            assert!((d.score - n.score * DEGRADED_FACTOR).abs() < 1e-9);
            assert_eq!(d.confidence, Level::Low);
        }
    }

    #[test]
    fn rtt_variance_reacts_to_nearby_samples() {
        let mut ping = PingFocus::empty("device_side_ping", 0.2);
        ping.jitter_events = (0..10).map(|i| jitter_at(i * 10_000)).collect();
        let mut app = empty_app();
        for i in 0..10 {
            app.metrics.push(crate::appfocus::AppMetricSample {
                ts: i * 10_000 + 200,
                metric: "rtt_var_ms",
                value: 35.0,
                unit: "ms",
                phase: Phase::Stream,
                in_session: true,
                confidence: 0.95,
                metric_source: MetricSource::InternalStats,
            });
        }
        let store = EventStore::new();
        let inputs = CauseInputs {
            app: &app,
            device_ping: &ping,
            store: &store,
            degraded: false,
        };
        let ranked = rank_causes(&inputs);
        assert_eq!(ranked[0].cause, CauseKind::RttVarianceBurst);
        assert!(ranked[0].overlap >= 0.99);
        assert!(ranked[0].intensity > 0.7);
    }
}
