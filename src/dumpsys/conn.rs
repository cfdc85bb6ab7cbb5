//! `dumpsys connectivity` parsing and transition detection.
//!
//! Tracks the default network id and its transport set; a change of id
//! is a default-network switch, a change of transports on the same id
//! is a transport change.

use once_cell::sync::Lazy;
use regex::Regex;

use super::emit;
use crate::event::{EventStore, EventType};
use crate::timeparse::EpochMs;

static DEFAULT_NET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)active default network:\s*(\d+|none)").expect("default net regex")
});
static AGENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"NetworkAgentInfo.*network\s+(\d+).*Transports:\s*([A-Z_|]+)")
        .expect("network agent regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnState {
    pub default_net: Option<i64>,
    /// Sorted transport tokens of the default network.
    pub transports: Vec<String>,
}

pub fn parse(body: &[String]) -> ConnState {
    let mut state = ConnState::default();
    let mut agent_transports: Vec<(i64, Vec<String>)> = Vec::new();
    for line in body {
        if let Some(caps) = DEFAULT_NET_RE.captures(line) {
            state.default_net = caps[1].parse().ok();
        }
        if let Some(caps) = AGENT_RE.captures(line) {
            if let Ok(id) = caps[1].parse::<i64>() {
                let mut transports: Vec<String> =
                    caps[2].split('|').map(|t| t.trim().to_string()).collect();
                transports.sort();
                agent_transports.push((id, transports));
            }
        }
    }
    if let Some(id) = state.default_net {
        if let Some((_, transports)) = agent_transports.iter().find(|(aid, _)| *aid == id) {
            state.transports = transports.clone();
        }
    }
    state
}

pub fn diff(prev: &ConnState, cur: &ConnState, ts: EpochMs, store: &mut EventStore) {
    match (prev.default_net, cur.default_net) {
        (Some(p), Some(c)) if p != c => {
            emit(
                store,
                "conn",
                EventType::ConnDefaultSwitch,
                ts,
                Some(format!("default network {p} -> {c}")),
            );
        }
        (Some(p), Some(_)) if prev.transports != cur.transports => {
            emit(
                store,
                "conn",
                EventType::ConnDefaultTransportChange,
                ts,
                Some(format!(
                    "network {p} transports {} -> {}",
                    prev.transports.join("|"),
                    cur.transports.join("|")
                )),
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_default_network_and_transports() {
        let s = parse(&body(&[
            "Active default network: 102",
            "  NetworkAgentInfo{ network 102 ... Transports: WIFI }",
            "  NetworkAgentInfo{ network 101 ... Transports: CELLULAR }",
        ]));
        assert_eq!(s.default_net, Some(102));
        assert_eq!(s.transports, vec!["WIFI"]);
    }

    #[test]
    fn switch_beats_transport_change() {
        let mut store = EventStore::new();
        let wifi = ConnState {
            default_net: Some(102),
            transports: vec!["WIFI".into()],
        };
        let cell = ConnState {
            default_net: Some(103),
            transports: vec!["CELLULAR".into()],
        };
        diff(&wifi, &cell, 1_000, &mut store);
        assert_eq!(store.count(EventType::ConnDefaultSwitch), 1);
        assert_eq!(store.count(EventType::ConnDefaultTransportChange), 0);
    }

    #[test]
    fn transport_change_on_same_network() {
        let mut store = EventStore::new();
        let a = ConnState {
            default_net: Some(102),
            transports: vec!["WIFI".into()],
        };
        let b = ConnState {
            default_net: Some(102),
            transports: vec!["VPN".into(), "WIFI".into()],
        };
        diff(&a, &b, 1_000, &mut store);
        assert_eq!(store.count(EventType::ConnDefaultTransportChange), 1);
    }
}
