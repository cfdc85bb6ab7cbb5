// Snapshot-frame round-trip behavior over real files.

use std::io::Cursor;

use jitterscope::snapshot::{read_snapshots, SnapStatus, Snapshot, SnapshotReader, SnapshotWriter};
use jitterscope::timeparse::parse_iso;

use proptest::prelude::*;

fn write_frames(snaps: &[Snapshot]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = SnapshotWriter::new(&mut buf);
    for snap in snaps {
        writer.write_frame(snap).unwrap();
    }
    buf
}

fn parse_frames(bytes: &[u8]) -> Vec<Snapshot> {
    SnapshotReader::new(Cursor::new(bytes.to_vec()))
        .collect::<std::io::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn two_frame_file_parses_exactly() {
    // A wifi OK frame with a body and an alarm TIMEOUT frame without.
    let ts = parse_iso("2024-06-01T10:00:00.000Z").unwrap();
    let input = vec![
        Snapshot {
            host_ts: ts,
            task: "wifi".into(),
            status: SnapStatus::Ok,
            duration_ms: 42,
            detail: None,
            body: vec!["Wi-Fi is enabled".into()],
        },
        Snapshot {
            host_ts: ts + 10_000,
            task: "alarm".into(),
            status: SnapStatus::Timeout,
            duration_ms: 20_000,
            detail: Some("timed_out".into()),
            body: vec![],
        },
    ];
    let parsed = parse_frames(&write_frames(&input));
    assert_eq!(parsed.len(), 2);

    assert_eq!(parsed[0].task, "wifi");
    assert_eq!(parsed[0].status, SnapStatus::Ok);
    assert_eq!(parsed[0].duration_ms, 42);
    assert_eq!(parsed[0].host_ts, ts);
    assert_eq!(parsed[0].body, vec!["Wi-Fi is enabled"]);

    assert_eq!(parsed[1].task, "alarm");
    assert_eq!(parsed[1].status, SnapStatus::Timeout);
    assert_eq!(parsed[1].duration_ms, 20_000);
    assert_eq!(parsed[1].detail.as_deref(), Some("timed_out"));
    // Bodyless frames parse to the placeholder.
    assert_eq!(parsed[1].body, vec!["[no output]"]);
}

#[test]
fn roundtrip_through_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dumpsys_wifi.log");
    let ts = parse_iso("2024-06-01T10:00:00.000Z").unwrap();
    let snaps = vec![Snapshot {
        host_ts: ts,
        task: "wifi".into(),
        status: SnapStatus::Ok,
        duration_ms: 7,
        detail: None,
        body: vec!["line one".into(), "line two".into()],
    }];
    std::fs::write(&path, write_frames(&snaps)).unwrap();
    let parsed = read_snapshots(&path).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].body, vec!["line one", "line two"]);
}

// --- Property: write -> parse -> write is byte-stable, and the parsed
// (host_ts, task, status, duration_ms, body) fields survive exactly.

fn arb_status() -> impl Strategy<Value = SnapStatus> {
    prop_oneof![
        Just(SnapStatus::Ok),
        Just(SnapStatus::Timeout),
        Just(SnapStatus::Error),
        Just(SnapStatus::Skipped),
    ]
}

fn arb_body_line() -> impl Strategy<Value = String> {
    // Any printable line that is not the frame trailer.
    "[ -~]{0,60}".prop_filter("not a frame marker", |s| !s.starts_with("### SNAPSHOT"))
}

prop_compose! {
    fn arb_snapshot()(
        ts in 1_500_000_000_000i64..1_900_000_000_000i64,
        task in "[a-z]{3,10}",
        status in arb_status(),
        duration in 0i64..30_000,
        body in prop::collection::vec(arb_body_line(), 0..6),
    ) -> Snapshot {
        Snapshot {
            host_ts: ts,
            task,
            status,
            duration_ms: duration,
            detail: None,
            body,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_frame_roundtrip(snaps in prop::collection::vec(arb_snapshot(), 0..8)) {
        let first = write_frames(&snaps);
        let parsed = parse_frames(&first);
        prop_assert_eq!(parsed.len(), snaps.len());
        for (orig, got) in snaps.iter().zip(parsed.iter()) {
            prop_assert_eq!(got.host_ts, orig.host_ts);
            prop_assert_eq!(&got.task, &orig.task);
            prop_assert_eq!(got.status, orig.status);
            prop_assert_eq!(got.duration_ms, orig.duration_ms);
            let expected_body: Vec<String> = if orig.body.is_empty() {
                vec!["[no output]".to_string()]
            } else {
                orig.body.clone()
            };
            prop_assert_eq!(&got.body, &expected_body);
        }
        // Re-serializing the parsed frames reproduces the bytes.
        let second = write_frames(&parsed);
        prop_assert_eq!(first, second);
    }
}
