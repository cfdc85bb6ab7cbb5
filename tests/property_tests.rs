// Property tests for the universal pipeline invariants: event-store
// ordering and suppression, latency threshold and high-latency
// classification, jitter membership, burst coverage, and effective
// window geometry.

use proptest::prelude::*;

use jitterscope::event::{Event, EventSource, EventStore, EventType};
use jitterscope::ping::{DevicePingParser, JITTER_STEP_MS};
use jitterscope::session::{SessionBuffers, SessionDetector, StreamDetection, WindowMode};
use jitterscope::timeparse::{parse_threadtime, YearAnchor};

// --- Event store ---

fn arb_event_type() -> impl Strategy<Value = EventType> {
    (0usize..EventType::ALL.len()).prop_map(|i| EventType::ALL[i])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Per-type arrays are monotonically non-decreasing regardless of
    /// insertion order, and suppression never drops an event outside
    /// its type tolerance.
    #[test]
    fn prop_store_sorted_and_suppressed(
        events in prop::collection::vec((arb_event_type(), 0i64..10_000_000), 0..300)
    ) {
        let mut store = EventStore::new();
        for (ty, ts) in &events {
            store.insert(Event {
                ty: *ty,
                ts: *ts,
                source: EventSource::Logcat,
                raw_line: None,
            });
        }
        for ty in EventType::ALL {
            let ts = store.timestamps(ty);
            prop_assert!(ts.windows(2).all(|w| w[0] <= w[1]), "{} unsorted", ty);
            let tol = ty.dedup_tolerance_ms();
            if tol > 0 {
                // Survivors of a tolerance-bearing type are spaced at
                // least the tolerance apart.
                prop_assert!(
                    ts.windows(2).all(|w| w[1] - w[0] >= tol),
                    "{} kept near-duplicates", ty
                );
            }
        }
        // Inserted + suppressed accounts for every offered event.
        prop_assert_eq!(
            store.total() + store.suppressed_total(),
            events.len() as u64
        );
    }
}

// --- Ping derivations ---

fn focus_from_latencies(latencies: &[Option<f64>]) -> jitterscope::ping::PingFocus {
    let mut parser = DevicePingParser::new(Some(0), 1.0);
    for (i, latency) in latencies.iter().enumerate() {
        match latency {
            Some(ms) => parser.push_line(&format!(
                "64 bytes from 1.1.1.1: icmp_seq={} ttl=55 time={:.3} ms",
                i + 1,
                ms
            )),
            None => parser.push_line(&format!("no answer yet for icmp_seq={}", i + 1)),
        }
    }
    parser.finish(&StreamDetection::empty(0, i64::MAX / 2))
}

fn arb_latency() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        4 => (1.0f64..200.0).prop_map(Some),
        1 => Just(None),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// threshold >= 15 and every high-latency event is >= threshold.
    #[test]
    fn prop_threshold_and_high_events(latencies in prop::collection::vec(arb_latency(), 0..80)) {
        let focus = focus_from_latencies(&latencies);
        prop_assert!(focus.threshold_ms >= 15.0);
        for &idx in &focus.high_latency_idx {
            let sample = &focus.samples[idx];
            prop_assert!(sample.success);
            prop_assert!(sample.latency_ms.unwrap() >= focus.threshold_ms - 1e-9);
        }
        // And no successful sample at or above threshold is missed.
        let expected = focus
            .samples
            .iter()
            .filter(|s| s.success && s.latency_ms.unwrap() >= focus.threshold_ms)
            .count();
        prop_assert_eq!(focus.high_latency_idx.len(), expected);
    }

    /// A jitter event exists for a consecutive successful pair iff the
    /// latency step is at least 8 ms.
    #[test]
    fn prop_jitter_membership(latencies in prop::collection::vec(arb_latency(), 0..80)) {
        let focus = focus_from_latencies(&latencies);
        let successes: Vec<(i64, f64)> = focus
            .samples
            .iter()
            .filter_map(|s| s.latency_ms.map(|l| (s.ts, l)))
            .collect();
        let mut expected = Vec::new();
        for pair in successes.windows(2) {
            if (pair[1].1 - pair[0].1).abs() >= JITTER_STEP_MS {
                expected.push(pair[1].0);
            }
        }
        let got: Vec<i64> = focus.jitter_events.iter().map(|j| j.ts).collect();
        prop_assert_eq!(got, expected);
    }

    /// Bursts partition the high-latency events: every event is in
    /// exactly one burst, gaps inside a burst are <= 1200 ms, and
    /// bursts are disjoint and ordered.
    #[test]
    fn prop_burst_coverage(latencies in prop::collection::vec(arb_latency(), 0..80)) {
        let focus = focus_from_latencies(&latencies);
        let covered: usize = focus.bursts.iter().map(|b| b.count).sum();
        prop_assert_eq!(covered, focus.high_latency_idx.len());
        for pair in focus.bursts.windows(2) {
            prop_assert!(pair[0].end_ts < pair[1].start_ts, "bursts overlap");
            // Maximality: the gap separating two bursts exceeds 1200ms.
            prop_assert!(pair[1].start_ts - pair[0].end_ts > 1_200);
        }
        for burst in &focus.bursts {
            prop_assert!(burst.start_ts <= burst.end_ts);
            let inside: Vec<i64> = focus
                .high_latency_idx
                .iter()
                .map(|&i| focus.samples[i].ts)
                .filter(|&ts| ts >= burst.start_ts && ts <= burst.end_ts)
                .collect();
            prop_assert_eq!(inside.len(), burst.count);
            for gap in inside.windows(2) {
                prop_assert!(gap[1] - gap[0] <= 1_200);
            }
        }
    }
}

// --- Effective windows ---

fn arb_marker_line() -> impl Strategy<Value = (u32, &'static str)> {
    (
        0u32..1_800,
        prop_oneof![
            Just("[INTERNAL_STATS] fps(total/rx/rd)=60/60/60 loss=0/1000(0.00%) lossEvents=0 rtt=15ms rttVar=2ms decode=3ms render=4ms total=22ms host[min/max/avg]=1/5/3ms"),
            Just("Launched new game session"),
            Just("Configuring with format 1920x1080"),
            Just("Connection terminated"),
            Just("Rx 60 / Rd 60 FPS"),
        ],
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Effective windows are sorted, disjoint, and clipped to the
    /// capture range.
    #[test]
    fn prop_effective_window_geometry(
        mut markers in prop::collection::vec(arb_marker_line(), 0..60)
    ) {
        markers.sort_by_key(|(offset, _)| *offset);
        let anchor = YearAnchor::from_year(2024);
        let mut detector = SessionDetector::new();
        for (offset, message) in &markers {
            let line = format!(
                "01-01 10:{:02}:{:02}.000  1000  2000 I LimeLog: {}",
                offset / 60,
                offset % 60,
                message
            );
            if let Some(parsed) = parse_threadtime(&line, &anchor) {
                detector.observe(&parsed);
            }
        }
        let start = jitterscope::timeparse::parse_iso("2024-01-01T10:00:00.000Z").unwrap();
        let end = jitterscope::timeparse::parse_iso("2024-01-01T10:30:00.000Z").unwrap();
        let detection = detector.finish(WindowMode::Auto, SessionBuffers::default(), start, end);

        let eff = &detection.effective;
        for win in eff {
            prop_assert!(win.start_ts >= start);
            prop_assert!(win.end_ts <= end);
            prop_assert!(win.start_ts < win.end_ts);
        }
        for pair in eff.windows(2) {
            prop_assert!(pair[0].end_ts < pair[1].start_ts, "effective windows overlap");
        }
        // Every valid raw window is covered by some effective window.
        for win in detection.windows.iter().filter(|w| w.valid) {
            let clipped_start = win.start_ts.max(start);
            prop_assert!(
                eff.iter().any(|e| e.start_ts <= clipped_start && win.end_ts.min(end) <= e.end_ts),
                "valid window not covered"
            );
        }
    }
}
