// End-to-end stream-session detection over a synthetic logcat excerpt.

use jitterscope::session::{Phase, SessionBuffers, SessionDetector, WindowMode};
use jitterscope::timeparse::{fmt_ts, parse_iso, parse_threadtime, YearAnchor};

fn feed(detector: &mut SessionDetector, lines: &[String]) {
    let anchor = YearAnchor::from_year(2024);
    for line in lines {
        if let Some(parsed) = parse_threadtime(line, &anchor) {
            detector.observe(&parsed);
        }
    }
}

fn session_lines() -> Vec<String> {
    let mut lines = vec![
        "01-01 10:00:00.000  1000  2000 I LimeLog: Launched new game session".to_string(),
        "01-01 10:00:05.000  1000  2000 I LimeLog: Configuring with format 1920x1080x60".to_string(),
    ];
    for i in 0..=30 {
        lines.push(format!(
            "01-01 10:00:{:02}.000  1000  2000 I LimeLog: [INTERNAL_STATS] fps(total/rx/rd)=60/60/60 loss=0/1000(0.00%) lossEvents=0 rtt=15ms rttVar=2ms decode=3ms render=4ms total=22ms host[min/max/avg]=1/5/3ms",
            10 + i
        ));
    }
    lines.push("01-01 10:00:45.000  1000  2000 I LimeLog: Connection terminated".to_string());
    lines
}

#[test]
fn one_valid_window_with_high_score() {
    let mut detector = SessionDetector::new();
    feed(&mut detector, &session_lines());
    let detection = detector.finish(
        WindowMode::Auto,
        SessionBuffers {
            pre_buffer_sec: 5,
            post_buffer_sec: 10,
            clock_skew_tolerance_sec: 0,
        },
        parse_iso("2024-01-01T09:55:00.000Z").unwrap(),
        parse_iso("2024-01-01T10:10:00.000Z").unwrap(),
    );

    assert_eq!(detection.windows.len(), 1);
    let window = &detection.windows[0];
    assert_eq!(fmt_ts(window.start_ts), "2024-01-01 10:00:00.000");
    assert_eq!(fmt_ts(window.end_ts), "2024-01-01 10:00:45.000");
    assert!(window.has_strong_start);
    assert!(window.has_start_marker);
    assert!(window.has_end_marker);
    assert!(window.score >= 0.9, "score was {}", window.score);
    assert!(window.valid);

    assert_eq!(detection.effective.len(), 1);
    let eff = &detection.effective[0];
    assert_eq!(fmt_ts(eff.start_ts), "2024-01-01 09:59:55.000");
    assert_eq!(fmt_ts(eff.end_ts), "2024-01-01 10:00:55.000");
}

#[test]
fn strict_mode_requires_strong_start() {
    // Same shape but without any INTERNAL_STATS / STREAM_SESSION lines:
    // enough activity for auto mode, rejected by strict.
    let mut lines = vec![
        "01-01 10:00:00.000  1000  2000 I LimeLog: Launched new game session".to_string(),
    ];
    for i in 0..10 {
        lines.push(format!(
            "01-01 10:00:{:02}.000  1000  2000 I LimeLog: Configuring with format pass {i}",
            5 + i * 4
        ));
    }
    let start = parse_iso("2024-01-01T09:55:00.000Z").unwrap();
    let end = parse_iso("2024-01-01T10:10:00.000Z").unwrap();

    let mut auto_detector = SessionDetector::new();
    feed(&mut auto_detector, &lines);
    let auto = auto_detector.finish(WindowMode::Auto, SessionBuffers::default(), start, end);
    assert!(auto.has_valid_session());

    let mut strict_detector = SessionDetector::new();
    feed(&mut strict_detector, &lines);
    let strict = strict_detector.finish(WindowMode::Strict, SessionBuffers::default(), start, end);
    assert!(!strict.has_valid_session());

    let mut all_detector = SessionDetector::new();
    feed(&mut all_detector, &lines);
    let all = all_detector.finish(WindowMode::All, SessionBuffers::default(), start, end);
    assert!(all.has_valid_session());
}

#[test]
fn short_window_is_invalid() {
    let lines = vec![
        "01-01 10:00:00.000  1000  2000 I LimeLog: [INTERNAL_STATS] fps(total/rx/rd)=60/60/60 loss=0/1000(0.00%) lossEvents=0 rtt=15ms rttVar=2ms decode=3ms render=4ms total=22ms host[min/max/avg]=1/5/3ms".to_string(),
        "01-01 10:00:05.000  1000  2000 I LimeLog: Connection terminated".to_string(),
    ];
    let mut detector = SessionDetector::new();
    feed(&mut detector, &lines);
    let detection = detector.finish(
        WindowMode::Auto,
        SessionBuffers::default(),
        parse_iso("2024-01-01T09:55:00.000Z").unwrap(),
        parse_iso("2024-01-01T10:10:00.000Z").unwrap(),
    );
    // 5 seconds < the 20s duration gate.
    assert_eq!(detection.windows.len(), 1);
    assert!(!detection.windows[0].valid);
    assert!(detection.effective.is_empty());
}

#[test]
fn phases_follow_the_valid_window() {
    let mut detector = SessionDetector::new();
    feed(&mut detector, &session_lines());
    let detection = detector.finish(
        WindowMode::Auto,
        SessionBuffers::default(),
        parse_iso("2024-01-01T09:55:00.000Z").unwrap(),
        parse_iso("2024-01-01T10:10:00.000Z").unwrap(),
    );
    let at = |s: &str| parse_iso(s).unwrap();
    assert_eq!(detection.phase(at("2024-01-01T09:58:00.000Z")), Phase::Preconnect);
    assert_eq!(detection.phase(at("2024-01-01T10:00:20.000Z")), Phase::Stream);
    assert_eq!(detection.phase(at("2024-01-01T10:02:00.000Z")), Phase::Post);
    // inSession uses the buffered effective window (pre 5 + skew 2).
    assert!(detection.in_session(at("2024-01-01T09:59:54.000Z")));
    assert!(!detection.in_session(at("2024-01-01T09:59:52.000Z")));
}
