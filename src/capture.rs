//! Capture orchestration: owns every child process (logcat, device
//! ping, host-side SSH, time-sliced dumpsys tasks), the shutdown
//! sequence, and the capture manifest.

pub mod children;
pub mod hostping;
pub mod manifest;
pub mod scheduler;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use children::{spawn_copy, spawn_prefix_tee, terminate_staged, PrefixWriter};
use manifest::{CaptureMeta, HostPingConfigBlock, PingConfigBlock, SshConfigBlock, MANIFEST_VERSION};
use scheduler::{CounterMap, DumpsysScheduler};

/// Why the capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Duration,
    Signal,
    Fault,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Duration => "duration",
            StopReason::Signal => "signal",
            StopReason::Fault => "fault",
        }
    }
}

fn adb_args(cfg: &CaptureConfig) -> Vec<String> {
    match &cfg.serial {
        Some(serial) => vec!["-s".to_string(), serial.clone()],
        None => Vec::new(),
    }
}

fn run_adb(cfg: &CaptureConfig, args: &[&str]) -> Result<std::process::Output> {
    Command::new("adb")
        .args(adb_args(cfg))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|_| Error::AdbMissing)
}

/// Lists attached devices as `(serial, state)` pairs.
fn list_devices() -> Result<Vec<(String, String)>> {
    let output = Command::new("adb")
        .arg("devices")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|_| Error::AdbMissing)?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some(state)) => Some((serial.to_string(), state.to_string())),
                _ => None,
            }
        })
        .collect())
}

/// Resolves the device to capture from; requires an online,
/// authorized device.
fn resolve_device(cfg: &CaptureConfig) -> Result<(String, Vec<String>)> {
    let devices = list_devices()?;
    let all: Vec<String> = devices.iter().map(|(s, _)| s.clone()).collect();
    let online: Vec<&(String, String)> =
        devices.iter().filter(|(_, state)| state == "device").collect();
    let serial = match &cfg.serial {
        Some(wanted) => online
            .iter()
            .find(|(s, _)| s == wanted)
            .map(|(s, _)| s.clone()),
        None => online.first().map(|(s, _)| s.clone()),
    };
    match serial {
        Some(s) => Ok((s, all)),
        None => Err(Error::NoDevice(
            devices
                .iter()
                .map(|(s, state)| format!("{s}:{state}"))
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

#[derive(Default)]
struct ChildSet {
    logcat: Option<Child>,
    device_ping: Option<Child>,
    io_threads: Vec<JoinHandle<()>>,
}

fn spawn_logcat(cfg: &CaptureConfig, dir: &Path, children: &mut ChildSet) -> Result<()> {
    let out_path = dir.join("logcat_all.log");
    let err_path = dir.join("logcat_stderr.log");
    let stdout_file = File::create(&out_path).map_err(|e| Error::io(&out_path, e))?;
    let stderr_file = File::create(&err_path).map_err(|e| Error::io(&err_path, e))?;

    let mut child = Command::new("adb")
        .args(adb_args(cfg))
        .args(["logcat", "-v", "threadtime"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|_| Error::AdbMissing)?;
    if let Some(stdout) = child.stdout.take() {
        children
            .io_threads
            .push(spawn_copy("logcat_stdout", stdout, stdout_file));
    }
    if let Some(stderr) = child.stderr.take() {
        children
            .io_threads
            .push(spawn_copy("logcat_stderr", stderr, stderr_file));
    }
    children.logcat = Some(child);
    Ok(())
}

fn spawn_device_ping(cfg: &CaptureConfig, dir: &Path, children: &mut ChildSet) -> Result<()> {
    let Some(ping) = &cfg.device_ping else {
        return Ok(());
    };
    let log_path = dir.join("ping_host.log");
    let file = File::create(&log_path).map_err(|e| Error::io(&log_path, e))?;
    let mut child = Command::new("adb")
        .args(adb_args(cfg))
        .args([
            "shell".to_string(),
            "ping".to_string(),
            "-i".to_string(),
            format!("{}", ping.interval_sec),
            ping.host_ip.clone(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| Error::AdbMissing)?;
    if let Some(stdout) = child.stdout.take() {
        children.io_threads.push(spawn_prefix_tee(
            "device_ping",
            stdout,
            PrefixWriter::new(file, "device_side_ping", cfg.tz_offset_min),
        ));
    }
    children.device_ping = Some(child);
    info!(ip = %ping.host_ip, interval = ping.interval_sec, "device ping started");
    Ok(())
}

fn base_manifest(cfg: &CaptureConfig, dir: &Path, serial: &str, devices: Vec<String>) -> CaptureMeta {
    CaptureMeta {
        version: MANIFEST_VERSION,
        started_at_iso: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        stopped_at_iso: None,
        output_dir: dir.to_path_buf(),
        minutes: cfg.minutes,
        device_serial: Some(serial.to_string()),
        device_list: devices,
        ping: PingConfigBlock {
            enabled: cfg.device_ping.is_some(),
            host_ip: cfg.device_ping.as_ref().map(|p| p.host_ip.clone()),
            interval_sec: cfg
                .device_ping
                .as_ref()
                .map(|p| p.interval_sec)
                .unwrap_or(0.2),
        },
        host_side_ping: HostPingConfigBlock {
            enabled: cfg.host_ping.is_some(),
            host_ip: cfg.host_ping.as_ref().map(|p| p.host_ip.clone()),
            interval_sec: cfg
                .host_ping
                .as_ref()
                .map(|p| p.interval_sec)
                .unwrap_or(0.0),
            ssh: cfg.host_ping.as_ref().map(|p| SshConfigBlock {
                host: p.ssh_host.clone(),
                user: p.ssh_user.clone(),
                port: p.ssh_port,
                key_path: p.ssh_key.clone(),
            }),
        },
        stop_reason: None,
        duration_sec: None,
        parse_exit_code: None,
        task_counters: std::collections::BTreeMap::new(),
        ping_log_tz_offset: cfg.tz_offset.clone(),
    }
}

/// Locates the report binary next to the running capture binary.
fn report_binary() -> PathBuf {
    let name = if cfg!(windows) {
        "jitterscope-report.exe"
    } else {
        "jitterscope-report"
    };
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

fn invoke_report(dir: &Path) -> Option<i32> {
    let binary = report_binary();
    info!(binary = %binary.display(), "invoking report phase");
    match Command::new(&binary)
        .arg("--dir")
        .arg(dir)
        .status()
    {
        Ok(status) => status.code(),
        Err(e) => {
            error!(error = %e, "report phase could not be spawned");
            Some(-1)
        }
    }
}

/// Runs the whole capture. Returns the process exit code.
pub fn run_capture(cfg: &CaptureConfig) -> Result<i32> {
    // Startup-fatal checks first: adb, device, host-side preflight.
    run_adb(cfg, &["version"])?;
    let (serial, devices) = resolve_device(cfg)?;
    info!(serial = %serial, "using device");
    if let Some(host_cfg) = &cfg.host_ping {
        hostping::preflight(host_cfg)?;
    }

    let dir = cfg
        .out_root
        .join(Utc::now().format("%Y%m%d_%H%M%S").to_string());
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    info!(dir = %dir.display(), "capture directory created");

    let mut meta = base_manifest(cfg, &dir, &serial, devices);
    meta.write(&dir)?;

    // Clear the device log buffer so the capture starts clean.
    if let Ok(output) = run_adb(cfg, &["logcat", "-c"]) {
        if !output.status.success() {
            warn!("logcat -c failed, capture will include older lines");
        }
    }

    let mut children = ChildSet::default();
    spawn_logcat(cfg, &dir, &mut children)?;
    spawn_device_ping(cfg, &dir, &mut children)?;

    let host_session = match &cfg.host_ping {
        Some(host_cfg) => Some(hostping::start(host_cfg, &dir, cfg.tz_offset_min)?),
        None => None,
    };

    let stopping = Arc::new(AtomicBool::new(false));
    let counters: CounterMap = Arc::new(Mutex::new(std::collections::BTreeMap::new()));
    let sched = DumpsysScheduler::start(
        dir.clone(),
        adb_args(cfg),
        Arc::clone(&counters),
        Arc::clone(&stopping),
    );

    // Signal thread: the first signal flips the flag and wakes the
    // main wait.
    let (stop_tx, stop_rx): (crossbeam_channel::Sender<()>, Receiver<()>) = bounded(1);
    let stopping_for_signal = Arc::clone(&stopping);
    std::thread::spawn(move || {
        let mut signals = match signal_hook::iterator::Signals::new([
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
            signal_hook::consts::SIGQUIT,
        ]) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "signal handler unavailable");
                return;
            }
        };
        if let Some(signal) = signals.forever().next() {
            info!(signal, "interrupt received, stopping capture");
            stopping_for_signal.store(true, Ordering::SeqCst);
            let _ = stop_tx.try_send(());
        }
    });

    let started = std::time::Instant::now();
    let duration = Duration::from_secs(cfg.minutes * 60);
    info!(
        duration = %crate::util::format_duration(duration),
        "capture running, Ctrl-C stops early"
    );
    let reason = match stop_rx.recv_timeout(duration) {
        Ok(()) => StopReason::Signal,
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => StopReason::Duration,
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => StopReason::Fault,
    };
    info!(reason = reason.as_str(), "capture stopping");

    // Shutdown: stop scheduling, drain the snapshot queue (bounded),
    // then take the children down in stages.
    stopping.store(true, Ordering::SeqCst);
    sched.join();

    if let Some(mut logcat) = children.logcat.take() {
        terminate_staged("logcat", &mut logcat);
    }
    if let Some(mut ping) = children.device_ping.take() {
        terminate_staged("device_ping", &mut ping);
    }
    if let Some(session) = host_session {
        if let Some(host_cfg) = &cfg.host_ping {
            session.stop(host_cfg);
        }
    }
    for handle in children.io_threads.drain(..) {
        let _ = handle.join();
    }

    meta.stop_reason = Some(reason.as_str().to_string());
    meta.stopped_at_iso = Some(Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());
    meta.duration_sec = Some(started.elapsed().as_secs());
    meta.task_counters = counters.lock().expect("counter mutex").clone();
    meta.write(&dir)?;
    for (task, c) in &meta.task_counters {
        info!(
            task = task.as_str(),
            runs = c.runs,
            ok = c.ok,
            skipped = c.skipped,
            timeout = c.timeout,
            error = c.error,
            "task counters"
        );
    }

    // Hand the directory to the report phase and record its exit code.
    let parse_exit = invoke_report(&dir);
    meta.parse_exit_code = parse_exit;
    meta.write(&dir)?;

    let ok = reason != StopReason::Fault && parse_exit == Some(0);
    Ok(if ok { 0 } else { 1 })
}
