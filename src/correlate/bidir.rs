//! Bidirectional device/host ping comparison.
//!
//! Overlaps the two sides' high-latency bursts, aligns their samples
//! with a two-pointer sweep, and classifies which direction of the
//! path carries the latency.

use serde::Serialize;

use crate::ping::PingFocus;
use crate::stats::quantile;
use crate::timeparse::EpochMs;

/// Burst intervals within this distance count as overlapping, ms.
const BURST_OVERLAP_MS: i64 = 1_000;
/// A side must outweigh the other by this factor to dominate.
const DOMINANCE_RATIO: f64 = 1.35;
/// High-confidence dominance threshold (two dominance steps).
const STRONG_RATIO: f64 = 2.7;
/// Burst overlap needed to call the pattern bidirectional.
const BIDIRECTIONAL_OVERLAP: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bidirectional,
    DeviceUplinkDominant,
    HostDownlinkDominant,
    MixedOrPathSpecific,
    Inconclusive,
    NoData,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bidirectional => "bidirectional",
            Direction::DeviceUplinkDominant => "device_uplink_dominant",
            Direction::HostDownlinkDominant => "host_downlink_dominant",
            Direction::MixedOrPathSpecific => "mixed_or_path_specific",
            Direction::Inconclusive => "inconclusive",
            Direction::NoData => "no_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BidirConfidence {
    Low,
    Medium,
    High,
}

impl BidirConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidirConfidence::Low => "low",
            BidirConfidence::Medium => "medium",
            BidirConfidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BidirReport {
    pub direction: Direction,
    pub confidence: BidirConfidence,
    pub burst_overlap_ratio: f64,
    pub matched_bursts: usize,
    pub device_bursts: usize,
    pub host_bursts: usize,
    pub device_score: f64,
    pub host_score: f64,
    pub sample_align_window_ms: i64,
    pub paired_count: usize,
    pub unpaired_device: usize,
    pub unpaired_host: usize,
    pub device_coverage: f64,
    pub host_coverage: f64,
    pub mean_signed_delta_ms: f64,
    pub p50_abs_delta_ms: f64,
    pub p95_abs_delta_ms: f64,
    pub max_abs_delta_ms: f64,
    pub findings: Vec<String>,
}

impl BidirReport {
    pub fn no_data() -> Self {
        BidirReport {
            direction: Direction::NoData,
            confidence: BidirConfidence::Low,
            burst_overlap_ratio: 0.0,
            matched_bursts: 0,
            device_bursts: 0,
            host_bursts: 0,
            device_score: 0.0,
            host_score: 0.0,
            sample_align_window_ms: 0,
            paired_count: 0,
            unpaired_device: 0,
            unpaired_host: 0,
            device_coverage: 0.0,
            host_coverage: 0.0,
            mean_signed_delta_ms: 0.0,
            p50_abs_delta_ms: 0.0,
            p95_abs_delta_ms: 0.0,
            max_abs_delta_ms: 0.0,
            findings: vec!["one or both ping logs are empty".to_string()],
        }
    }
}

/// `max(120, round(max(intervalA, intervalB) * 1500))` milliseconds.
fn align_window_ms(a: &PingFocus, b: &PingFocus) -> i64 {
    let widest = a.interval_sec.max(b.interval_sec);
    ((widest * 1_500.0).round() as i64).max(120)
}

fn burst_overlap(device: &PingFocus, host: &PingFocus) -> (usize, f64) {
    let matched = device
        .bursts
        .iter()
        .filter(|d| {
            host.bursts.iter().any(|h| {
                d.start_ts - BURST_OVERLAP_MS <= h.end_ts && h.start_ts <= d.end_ts + BURST_OVERLAP_MS
            })
        })
        .count();
    let denom = device.bursts.len().max(host.bursts.len()).max(1);
    (matched, matched as f64 / denom as f64)
}

/// Weighted per-side severity: `p95 + 0.4*max + 6*bursts`.
fn side_score(focus: &PingFocus) -> f64 {
    let sorted = focus.sorted_latencies();
    let p95 = quantile(&sorted, 0.95);
    let max = sorted.last().copied().unwrap_or(0.0);
    p95 + 0.4 * max + 6.0 * focus.bursts.len() as f64
}

struct Alignment {
    paired: Vec<f64>,
    unpaired_a: usize,
    unpaired_b: usize,
}

/// Two-pointer sweep over both sides' successful samples; each sample
/// pairs with at most one partner within the window.
fn align_samples(device: &PingFocus, host: &PingFocus, window_ms: i64) -> Alignment {
    let a: Vec<(EpochMs, f64)> = device
        .samples
        .iter()
        .filter_map(|s| s.latency_ms.map(|l| (s.ts, l)))
        .collect();
    let b: Vec<(EpochMs, f64)> = host
        .samples
        .iter()
        .filter_map(|s| s.latency_ms.map(|l| (s.ts, l)))
        .collect();

    let mut paired = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        let dt = a[i].0 - b[j].0;
        if dt.abs() <= window_ms {
            paired.push(a[i].1 - b[j].1);
            i += 1;
            j += 1;
        } else if dt < 0 {
            i += 1;
        } else {
            j += 1;
        }
    }
    Alignment {
        unpaired_a: a.len() - paired.len(),
        unpaired_b: b.len() - paired.len(),
        paired,
    }
}

pub fn analyze(device: &PingFocus, host: &PingFocus) -> BidirReport {
    if device.samples.is_empty() || host.samples.is_empty() {
        return BidirReport::no_data();
    }

    let window_ms = align_window_ms(device, host);
    let (matched, overlap_ratio) = burst_overlap(device, host);
    let alignment = align_samples(device, host, window_ms);

    let mut abs_deltas: Vec<f64> = alignment.paired.iter().map(|d| d.abs()).collect();
    abs_deltas.sort_by(|a, b| a.partial_cmp(b).expect("deltas are finite"));
    let mean_signed = if alignment.paired.is_empty() {
        0.0
    } else {
        alignment.paired.iter().sum::<f64>() / alignment.paired.len() as f64
    };

    let device_success = device.success_count().max(1);
    let host_success = host.success_count().max(1);
    let device_score = side_score(device);
    let host_score = side_score(host);

    let both_bursty = !device.bursts.is_empty() && !host.bursts.is_empty();
    let ratio = if host_score > 0.0 {
        device_score / host_score
    } else if device_score > 0.0 {
        f64::INFINITY
    } else {
        1.0
    };

    let direction = if both_bursty && overlap_ratio >= BIDIRECTIONAL_OVERLAP {
        Direction::Bidirectional
    } else if device_score >= DOMINANCE_RATIO * host_score && device_score > 0.0 {
        Direction::DeviceUplinkDominant
    } else if host_score >= DOMINANCE_RATIO * device_score && host_score > 0.0 {
        Direction::HostDownlinkDominant
    } else if both_bursty {
        Direction::MixedOrPathSpecific
    } else {
        Direction::Inconclusive
    };

    let confidence = match direction {
        Direction::DeviceUplinkDominant | Direction::HostDownlinkDominant => {
            let r = if ratio >= 1.0 { ratio } else { 1.0 / ratio };
            if r >= STRONG_RATIO {
                BidirConfidence::High
            } else {
                BidirConfidence::Medium
            }
        }
        Direction::Bidirectional => {
            if overlap_ratio >= 0.7 {
                BidirConfidence::High
            } else {
                BidirConfidence::Medium
            }
        }
        _ => BidirConfidence::Low,
    };

    let mut findings = Vec::new();
    if !device.bursts.is_empty() && host.bursts.is_empty() {
        findings.push("device_only_high_latency".to_string());
    }
    if device.bursts.is_empty() && !host.bursts.is_empty() {
        findings.push("host_only_high_latency".to_string());
    }
    if both_bursty && overlap_ratio >= BIDIRECTIONAL_OVERLAP {
        findings.push("bursts_overlap_both_sides".to_string());
    }
    if alignment.paired.is_empty() {
        findings.push("no_sample_pairs_within_window".to_string());
    }

    BidirReport {
        direction,
        confidence,
        burst_overlap_ratio: overlap_ratio,
        matched_bursts: matched,
        device_bursts: device.bursts.len(),
        host_bursts: host.bursts.len(),
        device_score,
        host_score,
        sample_align_window_ms: window_ms,
        paired_count: alignment.paired.len(),
        unpaired_device: alignment.unpaired_a,
        unpaired_host: alignment.unpaired_b,
        device_coverage: alignment.paired.len() as f64 / device_success as f64,
        host_coverage: alignment.paired.len() as f64 / host_success as f64,
        mean_signed_delta_ms: mean_signed,
        p50_abs_delta_ms: quantile(&abs_deltas, 0.5),
        p95_abs_delta_ms: quantile(&abs_deltas, 0.95),
        max_abs_delta_ms: abs_deltas.last().copied().unwrap_or(0.0),
        findings,
    }
}
