//! Small numeric primitives used throughout the report phase:
//! quantiles over sorted data, binary-search lower bounds, near-point
//! counting, 30-second gap histograms and periodicity scoring.
//!
//! Every near-point/window operation runs over sorted arrays via
//! `lower_bound`; none of the callers fall back to linear scans.

use crate::timeparse::EpochMs;

/// Clamps into `[0, 1]`.
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Linear normalization of `x` into `[0, 1]` over `[lo, hi]`.
pub fn norm(x: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    clamp01((x - lo) / (hi - lo))
}

/// First index whose element is `>= x`.
pub fn lower_bound(sorted: &[EpochMs], x: EpochMs) -> usize {
    sorted.partition_point(|&v| v < x)
}

/// Number of elements inside the closed window `[lo, hi]`.
pub fn count_in_window(sorted: &[EpochMs], lo: EpochMs, hi: EpochMs) -> usize {
    if hi < lo {
        return 0;
    }
    sorted.partition_point(|&v| v <= hi) - lower_bound(sorted, lo)
}

/// Quantile with linear interpolation over an ascending slice.
/// Returns 0.0 for empty input.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    if idx + 1 >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[idx] + (sorted[idx + 1] - sorted[idx]) * frac
    }
}

pub fn median(sorted: &[f64]) -> f64 {
    quantile(sorted, 0.5)
}

/// Interquartile range (p75 - p25).
pub fn iqr(sorted: &[f64]) -> f64 {
    quantile(sorted, 0.75) - quantile(sorted, 0.25)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Aggregate result of counting `points` near each element of `anchors`.
#[derive(Debug, Clone, Default)]
pub struct NearPoints {
    pub anchors: usize,
    /// Sum of per-anchor counts.
    pub total: usize,
    /// Anchors with at least one nearby point.
    pub hits: usize,
    pub hit_ratio: f64,
    pub avg_per_anchor: f64,
}

/// For each anchor `a`, counts points inside `[a - window_ms, a + window_ms]`.
/// Both slices must be ascending.
pub fn near_points(anchors: &[EpochMs], points: &[EpochMs], window_ms: i64) -> NearPoints {
    let mut out = NearPoints {
        anchors: anchors.len(),
        ..Default::default()
    };
    if anchors.is_empty() {
        return out;
    }
    for &a in anchors {
        let n = count_in_window(points, a - window_ms, a + window_ms);
        out.total += n;
        if n > 0 {
            out.hits += 1;
        }
    }
    out.hit_ratio = out.hits as f64 / out.anchors as f64;
    out.avg_per_anchor = out.total as f64 / out.anchors as f64;
    out
}

/// Inter-event gaps in seconds for an ascending timestamp slice.
pub fn gaps_seconds(ts: &[EpochMs]) -> Vec<f64> {
    ts.windows(2)
        .map(|w| (w[1] - w[0]) as f64 / 1000.0)
        .collect()
}

/// Top-`k` histogram bins of gap values at `bin_sec` resolution, sorted
/// by count descending (ties by bin start ascending). Each entry is
/// `(bin_start_sec, count)`.
pub fn top_gap_bins(gaps_sec: &[f64], bin_sec: u32, k: usize) -> Vec<(u32, usize)> {
    use std::collections::BTreeMap;
    let mut bins: BTreeMap<u32, usize> = BTreeMap::new();
    for &g in gaps_sec {
        if g < 0.0 {
            continue;
        }
        let b = (g as u32 / bin_sec) * bin_sec;
        *bins.entry(b).or_default() += 1;
    }
    let mut entries: Vec<(u32, usize)> = bins.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.truncate(k);
    entries
}

/// The closed set of candidate periods tested for periodic system
/// activity, in seconds.
pub const PERIOD_TARGETS_S: [f64; 11] = [
    30.0, 45.0, 60.0, 90.0, 120.0, 180.0, 240.0, 300.0, 420.0, 600.0, 900.0,
];

/// Fraction of gaps within ±`tolerance` (relative) of `target_s`.
pub fn period_match_ratio(gaps_sec: &[f64], target_s: f64, tolerance: f64) -> f64 {
    if gaps_sec.is_empty() {
        return 0.0;
    }
    let lo = target_s * (1.0 - tolerance);
    let hi = target_s * (1.0 + tolerance);
    let matched = gaps_sec.iter().filter(|&&g| g >= lo && g <= hi).count();
    matched as f64 / gaps_sec.len() as f64
}

/// Best `(period_s, match_ratio)` over the candidate target set at ±20%.
pub fn best_period(gaps_sec: &[f64]) -> (f64, f64) {
    let mut best = (0.0, 0.0);
    for &t in &PERIOD_TARGETS_S {
        let r = period_match_ratio(gaps_sec, t, 0.2);
        if r > best.1 {
            best = (t, r);
        }
    }
    best
}

/// Periodicity score per event type: `best_ratio * ln(count + 1)`.
pub fn periodicity_score(best_ratio: f64, count: usize) -> f64 {
    best_ratio * ((count + 1) as f64).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_bound_edges() {
        let a = [10, 20, 20, 30];
        assert_eq!(lower_bound(&a, 5), 0);
        assert_eq!(lower_bound(&a, 10), 0);
        assert_eq!(lower_bound(&a, 20), 1);
        assert_eq!(lower_bound(&a, 21), 3);
        assert_eq!(lower_bound(&a, 31), 4);
    }

    #[test]
    fn window_count_is_inclusive() {
        let a = [10, 20, 30];
        assert_eq!(count_in_window(&a, 10, 30), 3);
        assert_eq!(count_in_window(&a, 11, 29), 1);
        assert_eq!(count_in_window(&a, 31, 40), 0);
        assert_eq!(count_in_window(&a, 40, 31), 0);
    }

    #[test]
    fn quantiles_interpolate() {
        let a = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&a, 0.0), 1.0);
        assert_eq!(quantile(&a, 1.0), 4.0);
        assert!((quantile(&a, 0.5) - 2.5).abs() < 1e-9);
        assert_eq!(quantile(&[], 0.5), 0.0);
        assert_eq!(median(&[9.4, 11.2, 22.5]), 11.2);
    }

    #[test]
    fn near_point_counting() {
        let anchors = [1_000, 10_000];
        let points = [900, 1_500, 9_000];
        let np = near_points(&anchors, &points, 1_000);
        assert_eq!(np.total, 3);
        assert_eq!(np.hits, 2);
        assert!((np.hit_ratio - 1.0).abs() < 1e-9);
        let empty = near_points(&[], &points, 1_000);
        assert_eq!(empty.hit_ratio, 0.0);
    }

    #[test]
    fn periodic_gap_scoring() {
        // 60s cadence with small noise.
        let gaps = [59.0, 60.5, 61.0, 60.0, 58.5];
        let (period, ratio) = best_period(&gaps);
        assert_eq!(period, 60.0);
        assert!((ratio - 1.0).abs() < 1e-9);
        assert!(periodicity_score(ratio, 6) > 1.9);
    }

    #[test]
    fn gap_bins_sorted_by_count() {
        let gaps = [5.0, 12.0, 15.0, 62.0];
        let bins = top_gap_bins(&gaps, 30, 3);
        assert_eq!(bins[0], (0, 3));
        assert_eq!(bins[1], (60, 1));
    }
}
