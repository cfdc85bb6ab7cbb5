//! Dumpsys polling: six staggered periodic tasks serialized through a
//! single-concurrency queue so the USB bus is never oversubscribed.
//!
//! A tick that finds the queue occupied is recorded as
//! `SKIPPED reason=busy` and dropped (never queued); after the stop
//! flag is raised every tick records `SKIPPED reason=stopping`.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::children::terminate_staged;
use super::manifest::TaskCounters;
use crate::snapshot::{SnapStatus, Snapshot, SnapshotWriter};
use crate::timeparse::EpochMs;

/// Per-invocation dumpsys timeout.
const DUMPSYS_TIMEOUT: Duration = Duration::from_secs(20);
/// Bound on the shutdown drain of the in-flight task.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(25);
const POLL_STEP: Duration = Duration::from_millis(100);

/// One polled service.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub service: &'static str,
    pub interval_ms: u64,
    pub offset_ms: u64,
    pub line_cap: usize,
}

/// The six services with their cadences, start offsets and body caps.
pub const TASKS: [TaskSpec; 6] = [
    TaskSpec { service: "wifi", interval_ms: 2_000, offset_ms: 0, line_cap: 4_000 },
    TaskSpec { service: "conn", interval_ms: 10_000, offset_ms: 400, line_cap: 2_500 },
    TaskSpec { service: "deviceidle", interval_ms: 10_000, offset_ms: 800, line_cap: 1_500 },
    TaskSpec { service: "power", interval_ms: 10_000, offset_ms: 1_200, line_cap: 2_500 },
    TaskSpec { service: "alarm", interval_ms: 30_000, offset_ms: 1_600, line_cap: 3_500 },
    TaskSpec { service: "jobs", interval_ms: 30_000, offset_ms: 2_000, line_cap: 3_000 },
];

/// The dumpsys service name behind a task key (`conn` polls
/// `connectivity`).
fn dumpsys_service(task: &str) -> &str {
    match task {
        "conn" => "connectivity",
        other => other,
    }
}

pub type CounterMap = Arc<Mutex<std::collections::BTreeMap<String, TaskCounters>>>;

struct Job {
    spec: TaskSpec,
}

pub struct DumpsysScheduler {
    scheduler: JoinHandle<()>,
    worker: JoinHandle<()>,
}

fn now_ms() -> EpochMs {
    chrono::Utc::now().timestamp_millis()
}

fn append_frame(dir: &PathBuf, spec: &TaskSpec, snap: &Snapshot) {
    let path = dir.join(format!("dumpsys_{}.log", spec.service));
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(task = spec.service, error = %e, "cannot open snapshot log");
            return;
        }
    };
    let mut writer = SnapshotWriter::new(file);
    if let Err(e) = writer.write_frame(snap) {
        warn!(task = spec.service, error = %e, "snapshot append failed");
    }
}

fn record_skip(dir: &PathBuf, spec: &TaskSpec, counters: &CounterMap, reason: &str) {
    append_frame(
        dir,
        spec,
        &Snapshot {
            host_ts: now_ms(),
            task: spec.service.to_string(),
            status: SnapStatus::Skipped,
            duration_ms: 0,
            detail: Some(reason.to_string()),
            body: Vec::new(),
        },
    );
    let mut map = counters.lock().expect("counter mutex");
    map.entry(spec.service.to_string()).or_default().skipped += 1;
}

/// Runs `adb shell dumpsys <service>` with a timeout and a line cap,
/// returning the frame to append. A failure is local to the task.
fn run_dumpsys(adb_args: &[String], spec: &TaskSpec) -> Snapshot {
    let host_ts = now_ms();
    let started = Instant::now();
    let service = dumpsys_service(spec.service);

    let mut cmd = Command::new("adb");
    cmd.args(adb_args)
        .args(["shell", "dumpsys", service])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return Snapshot {
                host_ts,
                task: spec.service.to_string(),
                status: SnapStatus::Error,
                duration_ms: started.elapsed().as_millis() as i64,
                detail: Some(format!("spawn failed: {e}")),
                body: Vec::new(),
            }
        }
    };

    // Drain stdout on a helper thread so a large dump never blocks the
    // child on a full pipe.
    let stdout = child.stdout.take();
    let cap = spec.line_cap;
    let reader = thread::spawn(move || {
        let mut lines = Vec::new();
        let mut truncated = false;
        if let Some(out) = stdout {
            use std::io::{BufRead, BufReader};
            for line in BufReader::new(out).lines() {
                match line {
                    Ok(l) => {
                        if lines.len() < cap {
                            lines.push(l);
                        } else {
                            truncated = true;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
        (lines, truncated)
    });

    let deadline = Instant::now() + DUMPSYS_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    break None;
                }
                thread::sleep(POLL_STEP);
            }
            Err(e) => {
                warn!(task = spec.service, error = %e, "try_wait failed");
                break None;
            }
        }
    };

    let timed_out = status.is_none();
    if timed_out {
        terminate_staged(spec.service, &mut child);
    }
    let (mut body, truncated) = reader.join().unwrap_or_default();
    if truncated {
        body.push(format!("[truncated at {cap} lines]"));
    }
    let duration_ms = started.elapsed().as_millis() as i64;

    if timed_out {
        return Snapshot {
            host_ts,
            task: spec.service.to_string(),
            status: SnapStatus::Timeout,
            duration_ms,
            detail: Some("timed_out".to_string()),
            body,
        };
    }
    let status = status.expect("checked above");
    if status.success() {
        Snapshot {
            host_ts,
            task: spec.service.to_string(),
            status: SnapStatus::Ok,
            duration_ms,
            detail: None,
            body,
        }
    } else {
        Snapshot {
            host_ts,
            task: spec.service.to_string(),
            status: SnapStatus::Error,
            duration_ms,
            detail: Some(format!("exit {:?}", status.code())),
            body,
        }
    }
}

impl DumpsysScheduler {
    /// Starts the tick thread and the single worker.
    pub fn start(
        dir: PathBuf,
        adb_args: Vec<String>,
        counters: CounterMap,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        // Queue of one: a tick that cannot enqueue is a busy skip.
        let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = bounded(1);

        let worker_dir = dir.clone();
        let worker_counters = Arc::clone(&counters);
        let worker = thread::spawn(move || {
            for job in job_rx.iter() {
                // `runs` counts tasks that actually start.
                {
                    let mut map = worker_counters.lock().expect("counter mutex");
                    map.entry(job.spec.service.to_string()).or_default().runs += 1;
                }
                let snap = run_dumpsys(&adb_args, &job.spec);
                {
                    let mut map = worker_counters.lock().expect("counter mutex");
                    let entry = map.entry(job.spec.service.to_string()).or_default();
                    match snap.status {
                        SnapStatus::Ok => entry.ok += 1,
                        SnapStatus::Timeout => entry.timeout += 1,
                        SnapStatus::Error => entry.error += 1,
                        SnapStatus::Skipped => {}
                    }
                    entry.last_duration_ms = snap.duration_ms;
                }
                append_frame(&worker_dir, &job.spec, &snap);
            }
            debug!("dumpsys worker drained");
        });

        let scheduler = thread::spawn(move || {
            let start = Instant::now();
            let mut next_due: Vec<Instant> = TASKS
                .iter()
                .map(|t| start + Duration::from_millis(t.offset_ms))
                .collect();
            loop {
                // Earliest due task.
                let (idx, due) = next_due
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, d)| **d)
                    .map(|(i, d)| (i, *d))
                    .expect("task table is non-empty");
                let now = Instant::now();
                if due > now {
                    // No tick pending. Once the stop flag is up and
                    // every already-due tick has been recorded, the
                    // scheduler is done.
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    thread::sleep((due - now).min(POLL_STEP));
                    continue;
                }
                let spec = TASKS[idx];
                next_due[idx] = due + Duration::from_millis(spec.interval_ms);

                // A tick firing after the stop flag is raised is
                // recorded, never dispatched.
                if stopping.load(Ordering::SeqCst) {
                    record_skip(&dir, &spec, &counters, "stopping");
                    continue;
                }
                match job_tx.try_send(Job { spec }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        record_skip(&dir, &spec, &counters, "busy");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            // Dropping job_tx lets the worker drain and exit.
            debug!("dumpsys scheduler stopped");
        });

        DumpsysScheduler { scheduler, worker }
    }

    /// Waits for the tick thread and the in-flight task, bounded by
    /// [`DRAIN_TIMEOUT`]. The worker owns no state the shutdown path
    /// needs, so an overrun is logged and abandoned.
    pub fn join(self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let _ = self.scheduler.join();
        // JoinHandle has no timed join; poll is_finished instead.
        while !self.worker.is_finished() {
            if Instant::now() >= deadline {
                warn!("dumpsys worker did not drain within 25s, abandoning");
                return;
            }
            thread::sleep(POLL_STEP);
        }
        let _ = self.worker.join();
    }
}
