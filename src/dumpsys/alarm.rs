//! `dumpsys alarm` parsing and transition detection.

use once_cell::sync::Lazy;
use regex::Regex;

use super::emit;
use crate::event::{EventStore, EventType};
use crate::timeparse::{parse_android_duration, EpochMs};

/// Pending-count increase that qualifies as a queue jump.
const QUEUE_JUMP_DELTA: i64 = 8;
/// Wakeup-entry increase that qualifies as a burst.
const WAKEUP_BURST_DELTA: i64 = 3;
/// Absolute next-wakeup horizon for ALARM_WAKEUP_SOON.
const WAKEUP_SOON_MS: i64 = 5_000;
/// Boundary crossed downward also triggers ALARM_WAKEUP_SOON.
const WAKEUP_BOUNDARY_MS: i64 = 30_000;

static PENDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)pending alarm batches:\s*(\d+)").expect("pending alarm regex")
});
static NEXT_WAKEUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)next wakeup alarm:\s*(\+[\dhms]+)").expect("next wakeup regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmState {
    pub pending: Option<i64>,
    pub wakeup_entries: i64,
    /// Relative time to the next wakeup alarm, ms.
    pub next_wakeup_ms: Option<i64>,
}

pub fn parse(body: &[String]) -> AlarmState {
    let mut state = AlarmState::default();
    for line in body {
        if let Some(caps) = PENDING_RE.captures(line) {
            state.pending = caps[1].parse().ok();
        }
        if line.contains("RTC_WAKEUP") || line.contains("ELAPSED_WAKEUP") {
            state.wakeup_entries += 1;
        }
        if let Some(caps) = NEXT_WAKEUP_RE.captures(line) {
            state.next_wakeup_ms = parse_android_duration(&caps[1]);
        }
    }
    state
}

/// Absolute-value check, also applied to the very first snapshot.
pub fn check_absolute(cur: &AlarmState, ts: EpochMs, store: &mut EventStore) {
    if let Some(next) = cur.next_wakeup_ms {
        if next <= WAKEUP_SOON_MS {
            emit(store, "alarm", EventType::AlarmWakeupSoon, ts, None);
        }
    }
}

pub fn diff(prev: &AlarmState, cur: &AlarmState, ts: EpochMs, store: &mut EventStore) {
    if let (Some(p), Some(c)) = (prev.pending, cur.pending) {
        if c - p >= QUEUE_JUMP_DELTA {
            emit(store, "alarm", EventType::AlarmQueueJump, ts, None);
        }
    }
    if cur.wakeup_entries - prev.wakeup_entries >= WAKEUP_BURST_DELTA {
        emit(store, "alarm", EventType::AlarmWakeupBurst, ts, None);
    }
    match (prev.next_wakeup_ms, cur.next_wakeup_ms) {
        (_, Some(c)) if c <= WAKEUP_SOON_MS => {
            emit(store, "alarm", EventType::AlarmWakeupSoon, ts, None);
        }
        (Some(p), Some(c)) if p > WAKEUP_BOUNDARY_MS && c <= WAKEUP_BOUNDARY_MS => {
            emit(store, "alarm", EventType::AlarmWakeupSoon, ts, None);
        }
        _ => {}
    }
}
