//! `dumpsys jobscheduler` parsing and transition detection.

use once_cell::sync::Lazy;
use regex::Regex;

use super::emit;
use crate::event::{EventStore, EventType};
use crate::timeparse::EpochMs;

static TOP_STARTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)top.?started.*enforce(ment|d)[=: ]+true").expect("top-started regex")
});
static FGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfgs\b.*enforce(ment|d)[=: ]+true").expect("fgs regex"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobsState {
    pub top_started: i64,
    pub fgs: i64,
}

pub fn parse(body: &[String]) -> JobsState {
    let mut state = JobsState::default();
    for line in body {
        if TOP_STARTED_RE.is_match(line) {
            state.top_started += 1;
        }
        if FGS_RE.is_match(line) {
            state.fgs += 1;
        }
    }
    state
}

/// Any increase of the enforcement-true population in either class is a
/// job-activity spike.
pub fn diff(prev: &JobsState, cur: &JobsState, ts: EpochMs, store: &mut EventStore) {
    if cur.top_started > prev.top_started || cur.fgs > prev.fgs {
        emit(store, "jobs", EventType::JobActiveSpike, ts, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counts_enforcement_lines() {
        let s = parse(&body(&[
            "  top-started jobs: enforcement=true uid=10234 com.example/.SyncJob",
            "  fgs job active enforcement=true uid=10234",
            "  top-started jobs: enforcement=false uid=10235",
        ]));
        assert_eq!(s.top_started, 1);
        assert_eq!(s.fgs, 1);
    }

    #[test]
    fn spike_on_increase_only() {
        let mut store = EventStore::new();
        let a = JobsState {
            top_started: 1,
            fgs: 0,
        };
        let b = JobsState {
            top_started: 1,
            fgs: 0,
        };
        diff(&a, &b, 1_000, &mut store);
        assert_eq!(store.count(EventType::JobActiveSpike), 0);
        let c = JobsState {
            top_started: 1,
            fgs: 2,
        };
        diff(&a, &c, 60_000_000, &mut store);
        assert_eq!(store.count(EventType::JobActiveSpike), 1);
        // Decrease never fires.
        diff(&c, &a, 120_000_000, &mut store);
        assert_eq!(store.count(EventType::JobActiveSpike), 1);
    }
}
