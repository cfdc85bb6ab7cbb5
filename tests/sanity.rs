// Binary-level sanity checks for the report entry point.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn report_requires_a_directory_argument() {
    let mut cmd = Command::cargo_bin("jitterscope-report").unwrap();
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--dir"));
}

#[test]
fn report_rejects_missing_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("does_not_exist");
    let mut cmd = Command::cargo_bin("jitterscope-report").unwrap();
    cmd.arg("--dir").arg(&missing);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("logcat_all.log"));
}

#[test]
fn report_latest_fails_on_empty_root() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("jitterscope-report").unwrap();
    cmd.arg("--latest").arg("--logs-root").arg(tmp.path());
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no capture directory"));
}

#[test]
fn report_rejects_bad_window_mode() {
    let mut cmd = Command::cargo_bin("jitterscope-report").unwrap();
    cmd.args(["--dir", ".", "--stream-window-mode", "bogus"]);
    cmd.assert().failure().stderr(predicate::str::contains("auto|strict|all"));
}

#[test]
fn capture_rejects_bad_tz_offset() {
    let mut cmd = Command::cargo_bin("jitterscope-capture").unwrap();
    cmd.args(["--minutes", "1", "--ping-log-tz-offset", "+0800"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("timezone offset"));
}

#[test]
fn capture_rejects_bad_ip() {
    let mut cmd = Command::cargo_bin("jitterscope-capture").unwrap();
    cmd.args(["--minutes", "1", "--host-ping-ip", "999.1.2.3"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("IPv4"));
}
