//! Child-process plumbing for the capture supervisor: prefixed line
//! tees, plain stream copies, and staged termination.

use chrono::{FixedOffset, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::Child;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wait after the polite interrupt before escalating.
const POLITE_WAIT: Duration = Duration::from_millis(3_500);
/// Wait after the tree kill before the hard kill.
const TREE_WAIT: Duration = Duration::from_millis(1_500);
const POLL_STEP: Duration = Duration::from_millis(100);

/// Writes lines with the uniform ping-log prefix:
/// `[ts_local=<local-iso-with-offset>][epoch_ms=<int>][source=<source>] <line>`.
pub struct PrefixWriter {
    file: File,
    source: &'static str,
    offset: FixedOffset,
}

impl PrefixWriter {
    pub fn new(file: File, source: &'static str, tz_offset_min: i32) -> Self {
        let offset = FixedOffset::east_opt(tz_offset_min * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        PrefixWriter {
            file,
            source,
            offset,
        }
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let now = Utc::now();
        let local = now.with_timezone(&self.offset);
        writeln!(
            self.file,
            "[ts_local={}][epoch_ms={}][source={}] {}",
            local.format("%Y-%m-%d %H:%M:%S%.3f %:z"),
            now.timestamp_millis(),
            self.source,
            line
        )
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Copies a child stream line-by-line into a prefixing writer.
/// Line boundaries are preserved across chunk splits; a trailing
/// partial line is flushed when the stream ends.
pub fn spawn_prefix_tee<R: Read + Send + 'static>(
    name: &'static str,
    reader: R,
    mut writer: PrefixWriter,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match buf.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if let Err(e) = writer.write_line(trimmed) {
                        warn!(tee = name, error = %e, "prefix tee write failed");
                        break;
                    }
                }
                Err(e) => {
                    warn!(tee = name, error = %e, "prefix tee read failed");
                    break;
                }
            }
        }
        let _ = writer.flush();
        debug!(tee = name, "prefix tee finished");
    })
}

/// Plain byte copy of a child stream into a file (used for logcat,
/// whose lines must land verbatim).
pub fn spawn_copy<R: Read + Send + 'static>(
    name: &'static str,
    mut reader: R,
    mut file: File,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = std::io::copy(&mut reader, &mut file) {
            warn!(copy = name, error = %e, "stream copy failed");
        }
        let _ = file.flush();
        debug!(copy = name, "stream copy finished");
    })
}

fn wait_exit(child: &mut Child, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => thread::sleep(POLL_STEP),
            Err(_) => return true,
        }
    }
    false
}

#[cfg(unix)]
fn polite_interrupt(child: &Child) {
    // SAFETY: sending a signal to a pid we own; SIGINT is the
    // cooperative stop both adb and ssh honor.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
}

#[cfg(not(unix))]
fn polite_interrupt(_child: &Child) {}

#[cfg(unix)]
fn tree_kill(child: &Child) {
    let pid = child.id().to_string();
    let _ = std::process::Command::new("pkill")
        .args(["-KILL", "-P", pid.as_str()])
        .output();
    let group = format!("-{pid}");
    let _ = std::process::Command::new("kill")
        .args(["-9", group.as_str()])
        .output();
}

#[cfg(windows)]
fn tree_kill(child: &Child) {
    let pid = child.id().to_string();
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", pid.as_str(), "/T", "/F"])
        .output();
}

/// Escalating termination: polite interrupt, bounded wait, platform
/// tree kill, bounded wait, hard kill. Never blocks longer than the
/// two stage budgets plus the final wait.
pub fn terminate_staged(name: &str, child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    debug!(child = name, "terminating (polite)");
    polite_interrupt(child);
    if wait_exit(child, POLITE_WAIT) {
        return;
    }
    warn!(child = name, "ignored interrupt, escalating to tree kill");
    tree_kill(child);
    if wait_exit(child, TREE_WAIT) {
        return;
    }
    warn!(child = name, "survived tree kill, sending hard kill");
    if let Err(e) = child.kill() {
        warn!(child = name, error = %e, "hard kill failed");
    }
    let _ = child.wait();
}
