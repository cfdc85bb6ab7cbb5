// Cause-ranking scenarios: quiet ping profile with a lone coinciding
// system transition, and degraded-mode scaling.

use jitterscope::appfocus::{AppFocus, AppFocusCounters};
use jitterscope::correlate::causes::{rank_causes, CauseInputs, CauseKind, Level, DEGRADED_FACTOR};
use jitterscope::event::{Event, EventSource, EventStore, EventType};
use jitterscope::ping::{JitterEvent, PingFocus, PingSample, PingStatus, TsSource};
use jitterscope::session::Phase;

fn empty_app() -> AppFocus {
    AppFocus {
        metrics: Vec::new(),
        internal: Vec::new(),
        anomalies: Vec::new(),
        kept_lines: Vec::new(),
        counters: AppFocusCounters::default(),
    }
}

fn sample(ts: i64, latency: f64) -> PingSample {
    PingSample {
        ts,
        seq: None,
        success: true,
        latency_ms: Some(latency),
        status: PingStatus::Reply,
        ts_source: TsSource::LogPrefixEpoch,
        phase: Phase::Stream,
        in_session: true,
        line: String::new(),
    }
}

fn jitter(ts: i64, delta: f64) -> JitterEvent {
    JitterEvent {
        ts,
        seq: None,
        latency_ms: 14.0,
        prev_latency_ms: 14.0 - delta,
        delta_ms: delta,
        phase: Phase::Stream,
        in_session: true,
    }
}

/// Quiet ping focus: low loss, p95 ~14ms, tiny deltas, no bursts.
fn quiet_ping() -> PingFocus {
    let mut focus = PingFocus::empty("device_side_ping", 0.2);
    for i in 0..100 {
        focus.samples.push(sample(i * 1_000, 12.0 + (i % 3) as f64));
    }
    focus.jitter_events = vec![jitter(40_000, 9.0), jitter(80_000, 8.5)];
    focus
}

#[test]
fn lone_doze_coincidence_wins_at_low_level() {
    let ping = quiet_ping();
    let app = empty_app();
    let mut store = EventStore::new();
    // One DOZE_ENTER right on top of the first jitter point.
    store.insert(Event {
        ty: EventType::DozeEnter,
        ts: 40_300,
        source: EventSource::Dumpsys("deviceidle".into()),
        raw_line: None,
    });

    let ranked = rank_causes(&CauseInputs {
        app: &app,
        device_ping: &ping,
        store: &store,
        degraded: false,
    });

    assert_eq!(ranked[0].cause, CauseKind::SystemTransitionInterference);
    assert!(ranked[0].overlap >= 0.5, "overlap {}", ranked[0].overlap);
    assert!(ranked[0].score < 0.45, "score {}", ranked[0].score);
    assert_eq!(ranked[0].level, Level::Low);
    // Evidence is always 3..=5 rows.
    for cause in &ranked {
        assert!(
            (3..=5).contains(&cause.evidence.len()),
            "{:?} evidence count {}",
            cause.cause,
            cause.evidence.len()
        );
    }
}

#[test]
fn degraded_scores_are_exactly_scaled() {
    let ping = quiet_ping();
    let app = empty_app();
    let mut store = EventStore::new();
    store.insert(Event {
        ty: EventType::DozeEnter,
        ts: 40_300,
        source: EventSource::Dumpsys("deviceidle".into()),
        raw_line: None,
    });

    let normal = rank_causes(&CauseInputs {
        app: &app,
        device_ping: &ping,
        store: &store,
        degraded: false,
    });
    let degraded = rank_causes(&CauseInputs {
        app: &app,
        device_ping: &ping,
        store: &store,
        degraded: true,
    });

    for (d, n) in degraded.iter().zip(normal.iter()) {
        assert_eq!(d.cause, n.cause);
        assert!(
            (d.score - n.score * DEGRADED_FACTOR).abs() < 1e-9,
            "{:?}: {} vs {}",
            d.cause,
            d.score,
            n.score
        );
        assert_eq!(d.confidence, Level::Low);
    }
}

#[test]
fn score_is_the_weighted_feature_sum() {
    let ping = quiet_ping();
    let app = empty_app();
    let store = EventStore::new();
    let ranked = rank_causes(&CauseInputs {
        app: &app,
        device_ping: &ping,
        store: &store,
        degraded: false,
    });
    for cause in &ranked {
        let expected =
            (0.5 * cause.overlap + 0.3 * cause.lead_lag + 0.2 * cause.intensity).clamp(0.0, 1.0);
        assert!(
            (cause.score - expected).abs() < 1e-9,
            "{:?}: {} != {}",
            cause.cause,
            cause.score,
            expected
        );
    }
}
