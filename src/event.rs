//! The typed system-event model and the append-only event store.
//!
//! The store keeps one ascending array per event type and applies
//! near-duplicate suppression at insertion time: an event is accepted
//! only if no already-stored event of the same type lies within the
//! type's tolerance window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats::lower_bound;
use crate::timeparse::EpochMs;

/// Closed set of system event types the pipeline can emit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Scan,
    Roam,
    Disconnect,
    Connect,
    Dhcp,
    RssiChange,
    LinkSpeedChange,
    Validation,
    CaptivePortal,
    DozeEnter,
    DozeExit,
    IdleEnter,
    IdleExit,
    BatterySaverOn,
    BatterySaverOff,
    WifiOn,
    WifiOff,
    WifiIfaceUp,
    WifiIfaceDown,
    AlarmQueueJump,
    AlarmWakeupBurst,
    AlarmWakeupSoon,
    JobActiveSpike,
    WakelockSpike,
    ConnDefaultSwitch,
    ConnDefaultTransportChange,
}

impl EventType {
    /// All variants, in the column order used by the timeline CSV.
    pub const ALL: [EventType; 26] = [
        EventType::Scan,
        EventType::Roam,
        EventType::Disconnect,
        EventType::Connect,
        EventType::Dhcp,
        EventType::RssiChange,
        EventType::LinkSpeedChange,
        EventType::Validation,
        EventType::CaptivePortal,
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
        EventType::AlarmQueueJump,
        EventType::AlarmWakeupBurst,
        EventType::AlarmWakeupSoon,
        EventType::JobActiveSpike,
        EventType::WakelockSpike,
        EventType::ConnDefaultSwitch,
        EventType::ConnDefaultTransportChange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventType::Scan => "SCAN",
            EventType::Roam => "ROAM",
            EventType::Disconnect => "DISCONNECT",
            EventType::Connect => "CONNECT",
            EventType::Dhcp => "DHCP",
            EventType::RssiChange => "RSSI_CHANGE",
            EventType::LinkSpeedChange => "LINK_SPEED_CHANGE",
            EventType::Validation => "VALIDATION",
            EventType::CaptivePortal => "CAPTIVE_PORTAL",
            EventType::DozeEnter => "DOZE_ENTER",
            EventType::DozeExit => "DOZE_EXIT",
            EventType::IdleEnter => "IDLE_ENTER",
            EventType::IdleExit => "IDLE_EXIT",
            EventType::BatterySaverOn => "BATTERY_SAVER_ON",
            EventType::BatterySaverOff => "BATTERY_SAVER_OFF",
            EventType::WifiOn => "WIFI_ON",
            EventType::WifiOff => "WIFI_OFF",
            EventType::WifiIfaceUp => "WIFI_IFACE_UP",
            EventType::WifiIfaceDown => "WIFI_IFACE_DOWN",
            EventType::AlarmQueueJump => "ALARM_QUEUE_JUMP",
            EventType::AlarmWakeupBurst => "ALARM_WAKEUP_BURST",
            EventType::AlarmWakeupSoon => "ALARM_WAKEUP_SOON",
            EventType::JobActiveSpike => "JOB_ACTIVE_SPIKE",
            EventType::WakelockSpike => "WAKELOCK_SPIKE",
            EventType::ConnDefaultSwitch => "CONN_DEFAULT_SWITCH",
            EventType::ConnDefaultTransportChange => "CONN_DEFAULT_TRANSPORT_CHANGE",
        }
    }

    /// Near-duplicate suppression window, per type.
    pub fn dedup_tolerance_ms(&self) -> i64 {
        match self {
            EventType::Roam => 3_000,
            EventType::AlarmQueueJump => 20_000,
            EventType::AlarmWakeupBurst => 25_000,
            EventType::AlarmWakeupSoon => 15_000,
            EventType::JobActiveSpike => 20_000,
            EventType::WifiOn
            | EventType::WifiOff
            | EventType::WifiIfaceUp
            | EventType::WifiIfaceDown
            | EventType::DozeEnter
            | EventType::DozeExit
            | EventType::IdleEnter
            | EventType::IdleExit
            | EventType::BatterySaverOn
            | EventType::BatterySaverOff => 1_500,
            _ => 0,
        }
    }

    /// Network-path event types, counted by the pre/post transition
    /// alignment analysis.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            EventType::Scan
                | EventType::Roam
                | EventType::Disconnect
                | EventType::Connect
                | EventType::Dhcp
                | EventType::RssiChange
                | EventType::LinkSpeedChange
                | EventType::Validation
                | EventType::CaptivePortal
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an event was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Logcat,
    /// A dumpsys service name (`wifi`, `alarm`, ...).
    Dumpsys(String),
    /// Synthesized by the correlation engine (e.g. WAKELOCK_SPIKE).
    Derived,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Logcat => f.write_str("logcat"),
            EventSource::Dumpsys(svc) => write!(f, "dumpsys:{svc}"),
            EventSource::Derived => f.write_str("derived"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub ty: EventType,
    pub ts: EpochMs,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

/// Append-only store with per-type ascending indices.
#[derive(Debug, Default)]
pub struct EventStore {
    events: BTreeMap<EventType, Vec<Event>>,
    ts_index: BTreeMap<EventType, Vec<EpochMs>>,
    suppressed: BTreeMap<EventType, u64>,
    inserted_total: u64,
    suppressed_total: u64,
}

impl EventStore {
    pub fn new() -> Self {
        EventStore::default()
    }

    /// Inserts an event in timestamp order. Returns `false` when the
    /// event is suppressed as a near duplicate of an existing one.
    pub fn insert(&mut self, event: Event) -> bool {
        let tol = event.ty.dedup_tolerance_ms();
        let ts_vec = self.ts_index.entry(event.ty).or_default();
        let pos = lower_bound(ts_vec, event.ts);
        if tol > 0 {
            let near_prev = pos > 0 && (event.ts - ts_vec[pos - 1]) < tol;
            let near_next = pos < ts_vec.len() && (ts_vec[pos] - event.ts) < tol;
            if near_prev || near_next {
                *self.suppressed.entry(event.ty).or_default() += 1;
                self.suppressed_total += 1;
                return false;
            }
        }
        ts_vec.insert(pos, event.ts);
        self.events.entry(event.ty).or_default().insert(pos, event);
        self.inserted_total += 1;
        true
    }

    /// Ascending timestamps for one type.
    pub fn timestamps(&self, ty: EventType) -> &[EpochMs] {
        self.ts_index.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn events_of(&self, ty: EventType) -> &[Event] {
        self.events.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, ty: EventType) -> usize {
        self.timestamps(ty).len()
    }

    pub fn total(&self) -> u64 {
        self.inserted_total
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total
    }

    pub fn suppressed_of(&self, ty: EventType) -> u64 {
        self.suppressed.get(&ty).copied().unwrap_or(0)
    }

    /// Counts per type, in `EventType::ALL` order, skipping zeros.
    pub fn counts_by_type(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for ty in EventType::ALL {
            let n = self.count(ty);
            if n > 0 {
                out.insert(ty.name(), n);
            }
        }
        out
    }

    /// All events merged across types, ascending by timestamp
    /// (ties broken by type order).
    pub fn all_sorted(&self) -> Vec<&Event> {
        let mut all: Vec<&Event> = self.events.values().flatten().collect();
        all.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.ty.cmp(&b.ty)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ty: EventType, ts: EpochMs) -> Event {
        Event {
            ty,
            ts,
            source: EventSource::Logcat,
            raw_line: None,
        }
    }

    #[test]
    fn keeps_per_type_arrays_sorted() {
        let mut store = EventStore::new();
        for ts in [5_000, 1_000, 3_000, 9_000, 7_000] {
            store.insert(ev(EventType::Scan, ts));
        }
        let ts = store.timestamps(EventType::Scan);
        assert_eq!(ts, &[1_000, 3_000, 5_000, 7_000, 9_000]);
    }

    #[test]
    fn suppresses_near_duplicates_per_type() {
        let mut store = EventStore::new();
        assert!(store.insert(ev(EventType::Roam, 10_000)));
        // Within the 3s ROAM tolerance, both sides.
        assert!(!store.insert(ev(EventType::Roam, 12_000)));
        assert!(!store.insert(ev(EventType::Roam, 8_000)));
        // Outside the window.
        assert!(store.insert(ev(EventType::Roam, 13_100)));
        assert_eq!(store.count(EventType::Roam), 2);
        assert_eq!(store.suppressed_of(EventType::Roam), 2);
    }

    #[test]
    fn zero_tolerance_types_keep_everything() {
        let mut store = EventStore::new();
        assert!(store.insert(ev(EventType::Scan, 10_000)));
        assert!(store.insert(ev(EventType::Scan, 10_000)));
        assert!(store.insert(ev(EventType::Scan, 10_001)));
        assert_eq!(store.count(EventType::Scan), 3);
    }

    #[test]
    fn different_types_do_not_interact() {
        let mut store = EventStore::new();
        assert!(store.insert(ev(EventType::WifiOn, 10_000)));
        assert!(store.insert(ev(EventType::WifiOff, 10_100)));
        assert_eq!(store.total(), 2);
    }
}
