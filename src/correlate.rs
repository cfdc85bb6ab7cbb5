//! Multi-source event-time correlation: the per-minute timeline,
//! interval statistics, periodicity scoring, pre/post transition
//! alignment, and the near-point primitive shared with the cause
//! ranking model (`correlate::causes`) and the bidirectional ping
//! analysis (`correlate::bidir`).

pub mod bidir;
pub mod causes;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::event::{Event, EventSource, EventStore, EventType};
use crate::stats::{
    best_period, gaps_seconds, iqr, median, near_points, periodicity_score, quantile, top_gap_bins,
};
use crate::timeparse::{minute_floor, minute_key, EpochMs};

/// Window used by pre/post transition alignment, ms.
const ALIGN_WINDOW_MS: i64 = 60_000;

/// Event types whose inter-event gaps are analyzed for intervals and
/// periodicity.
pub const INTERVAL_TYPES: [EventType; 14] = [
    EventType::Scan,
    EventType::Roam,
    EventType::Disconnect,
    EventType::Connect,
    EventType::Dhcp,
    EventType::DozeEnter,
    EventType::DozeExit,
    EventType::IdleEnter,
    EventType::IdleExit,
    EventType::AlarmQueueJump,
    EventType::AlarmWakeupBurst,
    EventType::AlarmWakeupSoon,
    EventType::JobActiveSpike,
    EventType::WakelockSpike,
];

/// Transition types examined by the pre/post alignment analysis.
pub const TRANSITION_TYPES: [EventType; 10] = [
    EventType::DozeEnter,
    EventType::DozeExit,
    EventType::IdleEnter,
    EventType::IdleExit,
    EventType::BatterySaverOn,
    EventType::BatterySaverOff,
    EventType::WifiOn,
    EventType::WifiOff,
    EventType::WifiIfaceUp,
    EventType::WifiIfaceDown,
];

/// One timeline row: a minute key plus per-type counts in
/// `EventType::ALL` column order.
#[derive(Debug, Clone, Serialize)]
pub struct MinuteRow {
    pub minute: String,
    pub minute_start: EpochMs,
    pub counts: Vec<u64>,
}

impl MinuteRow {
    pub fn count_of(&self, ty: EventType) -> u64 {
        let idx = EventType::ALL
            .iter()
            .position(|t| *t == ty)
            .expect("type is in ALL");
        self.counts[idx]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub rows: Vec<MinuteRow>,
}

/// Derives WAKELOCK_SPIKE minutes from the per-minute wakelock hit
/// series and inserts the derived events into the store. A minute
/// spikes when its hit count exceeds `median + 1.5*IQR` and is
/// positive.
pub fn derive_wakelock_spikes(
    wakelock_hits: &BTreeMap<EpochMs, u64>,
    start: EpochMs,
    end: EpochMs,
    store: &mut EventStore,
) {
    let mut series: Vec<f64> = Vec::new();
    let mut minute = minute_floor(start);
    let last = minute_floor(end);
    while minute <= last {
        series.push(*wakelock_hits.get(&minute).unwrap_or(&0) as f64);
        minute += 60_000;
    }
    let mut sorted = series.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("counts are finite"));
    let gate = median(&sorted) + 1.5 * iqr(&sorted);

    let mut minute = minute_floor(start);
    for &count in &series {
        if count > 0.0 && count > gate {
            store.insert(Event {
                ty: EventType::WakelockSpike,
                ts: minute,
                source: EventSource::Derived,
                raw_line: None,
            });
        }
        minute += 60_000;
    }
}

/// Buckets every stored event into minute rows over `[start, end]`.
pub fn build_timeline(store: &EventStore, start: EpochMs, end: EpochMs) -> Timeline {
    let first = minute_floor(start);
    let last = minute_floor(end);
    let mut index: BTreeMap<EpochMs, Vec<u64>> = BTreeMap::new();
    let mut minute = first;
    while minute <= last {
        index.insert(minute, vec![0; EventType::ALL.len()]);
        minute += 60_000;
    }
    for (col, ty) in EventType::ALL.iter().enumerate() {
        for &ts in store.timestamps(*ty) {
            if ts < start || ts > end {
                continue;
            }
            if let Some(counts) = index.get_mut(&minute_floor(ts)) {
                counts[col] += 1;
            }
        }
    }
    Timeline {
        rows: index
            .into_iter()
            .map(|(minute_start, counts)| MinuteRow {
                minute: minute_key(minute_start),
                minute_start,
                counts,
            })
            .collect(),
    }
}

/// Inter-event gap statistics for one type.
#[derive(Debug, Clone, Serialize)]
pub struct IntervalStat {
    pub event_type: &'static str,
    pub count: usize,
    pub p25_s: f64,
    pub p50_s: f64,
    pub p75_s: f64,
    /// Top-3 gap bins at 30 s resolution: `(bin_start_s, count)`.
    pub top_bins: Vec<(u32, usize)>,
}

pub fn interval_stats(store: &EventStore) -> Vec<IntervalStat> {
    let mut out = Vec::new();
    for ty in INTERVAL_TYPES {
        let ts = store.timestamps(ty);
        if ts.len() < 2 {
            continue;
        }
        let mut gaps = gaps_seconds(ts);
        gaps.sort_by(|a, b| a.partial_cmp(b).expect("gaps are finite"));
        out.push(IntervalStat {
            event_type: ty.name(),
            count: ts.len(),
            p25_s: quantile(&gaps, 0.25),
            p50_s: quantile(&gaps, 0.5),
            p75_s: quantile(&gaps, 0.75),
            top_bins: top_gap_bins(&gaps, 30, 3),
        });
    }
    out
}

/// Periodicity result for one type.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodicEvent {
    pub event_type: &'static str,
    pub count: usize,
    pub best_period_s: f64,
    pub best_ratio: f64,
    pub score: f64,
}

/// Top-3 periodic event types by score.
pub fn top_periodic_events(store: &EventStore) -> Vec<PeriodicEvent> {
    let mut scored: Vec<PeriodicEvent> = Vec::new();
    for ty in INTERVAL_TYPES {
        let ts = store.timestamps(ty);
        if ts.len() < 3 {
            continue;
        }
        let gaps = gaps_seconds(ts);
        let (period, ratio) = best_period(&gaps);
        if ratio <= 0.0 {
            continue;
        }
        scored.push(PeriodicEvent {
            event_type: ty.name(),
            count: ts.len(),
            best_period_s: period,
            best_ratio: ratio,
            score: periodicity_score(ratio, ts.len()),
        });
    }
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
    scored.truncate(3);
    scored
}

/// Network-event density before vs after one transition type.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentStat {
    pub transition: &'static str,
    pub points: usize,
    pub pre_count: usize,
    pub post_count: usize,
    pub ratio: f64,
    pub increased: bool,
}

/// For each transition type, counts network-type events in the 60 s
/// windows before and after every transition point.
pub fn prepost_alignment(store: &EventStore) -> Vec<AlignmentStat> {
    // Merged ascending network-event timestamps.
    let mut network_ts: Vec<EpochMs> = Vec::new();
    for ty in EventType::ALL {
        if ty.is_network() {
            network_ts.extend_from_slice(store.timestamps(ty));
        }
    }
    network_ts.sort_unstable();

    let mut out = Vec::new();
    for ty in TRANSITION_TYPES {
        let points = store.timestamps(ty);
        if points.is_empty() {
            continue;
        }
        let mut pre = 0usize;
        let mut post = 0usize;
        for &p in points {
            pre += crate::stats::count_in_window(&network_ts, p - ALIGN_WINDOW_MS, p - 1);
            post += crate::stats::count_in_window(&network_ts, p, p + ALIGN_WINDOW_MS);
        }
        let ratio = post as f64 / pre.max(1) as f64;
        out.push(AlignmentStat {
            transition: ty.name(),
            points: points.len(),
            pre_count: pre,
            post_count: post,
            ratio,
            increased: post as f64 >= 1.5 * pre as f64 && post.saturating_sub(pre) >= 2,
        });
    }
    out
}

/// Hit ratios of system events around ping jitter points, per type.
/// Reported in the ping section of the report.
#[derive(Debug, Clone, Serialize)]
pub struct JitterHitRatio {
    pub event_type: &'static str,
    pub hit_ratio: f64,
    pub total_near: usize,
}

pub fn jitter_hit_ratios(store: &EventStore, jitter_points: &[EpochMs]) -> Vec<JitterHitRatio> {
    let mut out = Vec::new();
    for ty in EventType::ALL {
        let ts = store.timestamps(ty);
        if ts.is_empty() || jitter_points.is_empty() {
            continue;
        }
        let np = near_points(jitter_points, ts, 1_000);
        if np.total == 0 {
            continue;
        }
        out.push(JitterHitRatio {
            event_type: ty.name(),
            hit_ratio: np.hit_ratio,
            total_near: np.total,
        });
    }
    out.sort_by(|a, b| {
        b.hit_ratio
            .partial_cmp(&a.hit_ratio)
            .expect("ratios are finite")
            .then(b.total_near.cmp(&a.total_near))
    });
    out
}
