//! `dumpsys deviceidle` and `dumpsys power` parsing and transitions.
//!
//! Doze/idle state is derived from explicit boolean fields when present
//! and from state-token heuristics otherwise; battery saver comes from
//! the power service.

use once_cell::sync::Lazy;
use regex::Regex;

use super::emit;
use crate::event::{EventStore, EventType};
use crate::timeparse::EpochMs;

static DEEP_STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*mState=(\w+)").expect("deep state regex"));
static LIGHT_STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*mLightState=(\w+)").expect("light state regex"));
static FORCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"mForceIdle=(true|false)").expect("force idle regex"));
static SAVER_BOOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mBatterySaver(?:Enabled)?[=: ]+(true|false)").expect("saver bool regex")
});
static SAVER_STATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)battery saver state:\s*(on|off)").expect("saver state regex")
});

fn state_is_idle(token: &str) -> bool {
    matches!(token, "IDLE" | "IDLE_MAINTENANCE")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdleState {
    pub doze_on: Option<bool>,
    pub idle_on: Option<bool>,
}

pub fn parse_deviceidle(body: &[String]) -> IdleState {
    let mut state = IdleState::default();
    let text = body.join("\n");
    if let Some(caps) = DEEP_STATE_RE.captures(&text) {
        state.doze_on = Some(state_is_idle(&caps[1]));
    }
    if let Some(caps) = LIGHT_STATE_RE.captures(&text) {
        state.idle_on = Some(state_is_idle(&caps[1]));
    }
    // Forced idle counts as deep doze even when mState lags behind.
    if let Some(caps) = FORCED_RE.captures(&text) {
        if &caps[1] == "true" {
            state.doze_on = Some(true);
        }
    }
    state
}

pub fn diff_idle(prev: &IdleState, cur: &IdleState, ts: EpochMs, store: &mut EventStore) {
    if let (Some(p), Some(c)) = (prev.doze_on, cur.doze_on) {
        if p != c {
            let ty = if c { EventType::DozeEnter } else { EventType::DozeExit };
            emit(store, "deviceidle", ty, ts, None);
        }
    }
    if let (Some(p), Some(c)) = (prev.idle_on, cur.idle_on) {
        if p != c {
            let ty = if c { EventType::IdleEnter } else { EventType::IdleExit };
            emit(store, "deviceidle", ty, ts, None);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerState {
    pub battery_saver_on: Option<bool>,
}

pub fn parse_power(body: &[String]) -> PowerState {
    let mut state = PowerState::default();
    for line in body {
        if let Some(caps) = SAVER_BOOL_RE.captures(line) {
            state.battery_saver_on = Some(&caps[1] == "true");
        } else if let Some(caps) = SAVER_STATE_RE.captures(line) {
            state.battery_saver_on = Some(caps[1].eq_ignore_ascii_case("on"));
        }
    }
    state
}

pub fn diff_power(prev: &PowerState, cur: &PowerState, ts: EpochMs, store: &mut EventStore) {
    if let (Some(p), Some(c)) = (prev.battery_saver_on, cur.battery_saver_on) {
        if p != c {
            let ty = if c {
                EventType::BatterySaverOn
            } else {
                EventType::BatterySaverOff
            };
            emit(store, "power", ty, ts, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn deviceidle_states() {
        let s = parse_deviceidle(&body(&["  mState=IDLE", "  mLightState=INACTIVE"]));
        assert_eq!(s.doze_on, Some(true));
        assert_eq!(s.idle_on, Some(false));
        let s = parse_deviceidle(&body(&["  mState=ACTIVE", "  mLightState=IDLE_MAINTENANCE"]));
        assert_eq!(s.doze_on, Some(false));
        assert_eq!(s.idle_on, Some(true));
    }

    #[test]
    fn doze_transitions() {
        let mut store = EventStore::new();
        let active = IdleState {
            doze_on: Some(false),
            idle_on: Some(false),
        };
        let dozing = IdleState {
            doze_on: Some(true),
            idle_on: Some(false),
        };
        diff_idle(&active, &dozing, 1_000, &mut store);
        diff_idle(&dozing, &active, 60_000, &mut store);
        assert_eq!(store.count(EventType::DozeEnter), 1);
        assert_eq!(store.count(EventType::DozeExit), 1);
        assert_eq!(store.count(EventType::IdleEnter), 0);
    }

    #[test]
    fn battery_saver_both_spellings() {
        let s = parse_power(&body(&["Battery saver state: ON"]));
        assert_eq!(s.battery_saver_on, Some(true));
        let s = parse_power(&body(&["  mBatterySaverEnabled=false"]));
        assert_eq!(s.battery_saver_on, Some(false));
        let mut store = EventStore::new();
        diff_power(
            &PowerState {
                battery_saver_on: Some(false),
            },
            &PowerState {
                battery_saver_on: Some(true),
            },
            1_000,
            &mut store,
        );
        assert_eq!(store.count(EventType::BatterySaverOn), 1);
    }

    #[test]
    fn unknown_fields_never_emit() {
        let mut store = EventStore::new();
        diff_idle(&IdleState::default(), &IdleState { doze_on: Some(true), idle_on: None }, 1_000, &mut store);
        assert_eq!(store.total(), 0);
    }
}
