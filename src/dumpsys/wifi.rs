//! `dumpsys wifi` parsing and transition detection.

use once_cell::sync::Lazy;
use regex::Regex;

use super::emit;
use crate::event::{EventStore, EventType};
use crate::timeparse::EpochMs;

static WIFI_ENABLED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Wi-?Fi is (enabled|disabled)").expect("wifi enabled regex"));
static WIFI_MODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mWifiState[=: ]+WIFI_STATE_(ENABLED|DISABLED)").expect("wifi mode regex")
});
static WIFI_NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bWifiState[=: ]+(\d)").expect("wifi numeric regex"));
static IFACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"mIfaceIsUp[=: ]+(true|false)").expect("iface regex"));
static ROAM_RESULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CMD_TRIGGER_ROAMING_RESULT\S*\s*(.*)$").expect("roam result regex"));

/// Parsed view of one wifi snapshot body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WifiState {
    pub wifi_on: Option<bool>,
    pub iface_up: Option<bool>,
    /// Latest roam record line; advances when a new roam lands.
    pub roam_stamp: Option<String>,
}

pub fn parse(body: &[String]) -> WifiState {
    let mut state = WifiState::default();
    for line in body {
        if let Some(caps) = WIFI_ENABLED_RE.captures(line) {
            state.wifi_on = Some(caps[1].eq_ignore_ascii_case("enabled"));
        } else if let Some(caps) = WIFI_MODE_RE.captures(line) {
            state.wifi_on = Some(&caps[1] == "ENABLED");
        } else if let Some(caps) = WIFI_NUMERIC_RE.captures(line) {
            // WifiManager constants: 1 = disabled, 3 = enabled.
            match &caps[1] {
                "3" => state.wifi_on = Some(true),
                "1" => state.wifi_on = Some(false),
                _ => {}
            }
        }
        if let Some(caps) = IFACE_RE.captures(line) {
            state.iface_up = Some(&caps[1] == "true");
        }
        if ROAM_RESULT_RE.is_match(line) {
            state.roam_stamp = Some(line.trim().to_string());
        }
    }
    state
}

pub fn diff(prev: &WifiState, cur: &WifiState, ts: EpochMs, store: &mut EventStore) {
    if let (Some(p), Some(c)) = (prev.wifi_on, cur.wifi_on) {
        if p != c {
            let ty = if c { EventType::WifiOn } else { EventType::WifiOff };
            emit(store, "wifi", ty, ts, None);
        }
    }
    if let (Some(p), Some(c)) = (prev.iface_up, cur.iface_up) {
        if p != c {
            let ty = if c {
                EventType::WifiIfaceUp
            } else {
                EventType::WifiIfaceDown
            };
            emit(store, "wifi", ty, ts, None);
        }
    }
    // The roam stamp advanced: a roam landed between the two snapshots.
    if cur.roam_stamp.is_some() && cur.roam_stamp != prev.roam_stamp {
        emit(store, "wifi", EventType::Roam, ts, cur.roam_stamp.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_explicit_and_numeric_state() {
        let s = parse(&body(&["Wi-Fi is enabled", "mIfaceIsUp: true"]));
        assert_eq!(s.wifi_on, Some(true));
        assert_eq!(s.iface_up, Some(true));
        let s = parse(&body(&["WifiState: 1"]));
        assert_eq!(s.wifi_on, Some(false));
    }

    #[test]
    fn emits_on_off_and_iface_transitions() {
        let mut store = EventStore::new();
        let a = parse(&body(&["Wi-Fi is enabled", "mIfaceIsUp: true"]));
        let b = parse(&body(&["Wi-Fi is disabled", "mIfaceIsUp: false"]));
        diff(&a, &b, 1_000, &mut store);
        assert_eq!(store.count(EventType::WifiOff), 1);
        assert_eq!(store.count(EventType::WifiIfaceDown), 1);
        assert_eq!(store.count(EventType::WifiOn), 0);
    }

    #[test]
    fn roam_fires_only_when_stamp_advances() {
        let mut store = EventStore::new();
        let a = parse(&body(&[
            "rec[12]: time=06-01 10:00:01 CMD_TRIGGER_ROAMING_RESULT bssid=aa",
        ]));
        let same = a.clone();
        diff(&a, &same, 1_000, &mut store);
        assert_eq!(store.count(EventType::Roam), 0);
        let b = parse(&body(&[
            "rec[13]: time=06-01 10:09:01 CMD_TRIGGER_ROAMING_RESULT bssid=bb",
        ]));
        diff(&a, &b, 9_000_000, &mut store);
        assert_eq!(store.count(EventType::Roam), 1);
    }
}
