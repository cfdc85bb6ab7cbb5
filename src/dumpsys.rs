//! Dumpsys transition detection.
//!
//! Each supported service has a typed parser over snapshot bodies; a
//! transition event is emitted by comparing consecutive `OK` snapshots
//! of the same service. Every emitted event carries the snapshot's
//! `host_ts` as its event time; near-duplicate suppression is left to
//! the event store's per-type tolerances.

pub mod alarm;
pub mod conn;
pub mod jobs;
pub mod power;
pub mod wifi;

use crate::event::{Event, EventSource, EventStore, EventType};
use crate::snapshot::{SnapStatus, Snapshot};
use crate::timeparse::EpochMs;

/// The six polled services, in poll-cadence order.
pub const SERVICES: [&str; 6] = ["wifi", "conn", "deviceidle", "power", "alarm", "jobs"];

fn emit(store: &mut EventStore, service: &str, ty: EventType, ts: EpochMs, line: Option<String>) {
    store.insert(Event {
        ty,
        ts,
        source: EventSource::Dumpsys(service.to_string()),
        raw_line: line,
    });
}

/// Per-service incremental state, fed one snapshot at a time.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    wifi: Option<wifi::WifiState>,
    conn: Option<conn::ConnState>,
    alarm: Option<alarm::AlarmState>,
    jobs: Option<jobs::JobsState>,
    deviceidle: Option<power::IdleState>,
    power: Option<power::PowerState>,
    /// Snapshots fed but not usable (non-OK status).
    pub skipped_non_ok: u64,
}

impl TransitionDetector {
    pub fn new() -> Self {
        TransitionDetector::default()
    }

    /// Feeds one snapshot. Only `OK` snapshots advance state; other
    /// statuses are counted and ignored so a TIMEOUT frame never
    /// produces a phantom transition.
    pub fn observe(&mut self, snap: &Snapshot, store: &mut EventStore) {
        if snap.status != SnapStatus::Ok {
            self.skipped_non_ok += 1;
            return;
        }
        let ts = snap.host_ts;
        match snap.task.as_str() {
            "wifi" => {
                let cur = wifi::parse(&snap.body);
                if let Some(prev) = self.wifi.replace(cur.clone()) {
                    wifi::diff(&prev, &cur, ts, store);
                }
            }
            "conn" => {
                let cur = conn::parse(&snap.body);
                if let Some(prev) = self.conn.replace(cur.clone()) {
                    conn::diff(&prev, &cur, ts, store);
                }
            }
            "alarm" => {
                let cur = alarm::parse(&snap.body);
                if let Some(prev) = self.alarm.replace(cur.clone()) {
                    alarm::diff(&prev, &cur, ts, store);
                } else {
                    // `next wakeup <= 5s` fires on the absolute value,
                    // even without a previous snapshot to diff against.
                    alarm::check_absolute(&cur, ts, store);
                }
            }
            "jobs" => {
                let cur = jobs::parse(&snap.body);
                if let Some(prev) = self.jobs.replace(cur.clone()) {
                    jobs::diff(&prev, &cur, ts, store);
                }
            }
            "deviceidle" => {
                let cur = power::parse_deviceidle(&snap.body);
                if let Some(prev) = self.deviceidle.replace(cur.clone()) {
                    power::diff_idle(&prev, &cur, ts, store);
                }
            }
            "power" => {
                let cur = power::parse_power(&snap.body);
                if let Some(prev) = self.power.replace(cur.clone()) {
                    power::diff_power(&prev, &cur, ts, store);
                }
            }
            _ => {}
        }
    }
}
