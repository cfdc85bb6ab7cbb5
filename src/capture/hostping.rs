//! Host-side (Windows, over SSH) nping session management.
//!
//! Before starting, SSH reachability, PowerShell, nping, and the three
//! remote scripts are probed; any failure is a startup error. The
//! capture then holds one long-lived SSH session running the start
//! script and tees its output, prefixed, into `ping_host_side.log`;
//! a separate SSH call runs the stop script at shutdown.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{info, warn};

use super::children::{spawn_prefix_tee, terminate_staged, PrefixWriter};
use crate::config::HostPingConfig;
use crate::error::{Error, Result};

/// Remote PowerShell scripts the capture depends on.
pub const REMOTE_SCRIPTS: [&str; 3] = ["start_nping.ps1", "stop_nping.ps1", "rotate_nping.ps1"];

fn ssh_base(cfg: &HostPingConfig) -> Command {
    let mut cmd = Command::new("ssh");
    let port = cfg.ssh_port.to_string();
    cmd.arg("-i")
        .arg(&cfg.ssh_key)
        .args(["-p", port.as_str()])
        .args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=5"])
        .arg(format!("{}@{}", cfg.ssh_user, cfg.ssh_host));
    cmd
}

fn ssh_check(cfg: &HostPingConfig, remote_cmd: &str, what: &str) -> Result<()> {
    let output = ssh_base(cfg)
        .arg(remote_cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::HostPingVerification(format!("ssh not runnable: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::HostPingVerification(format!(
            "{what} check failed (exit {:?}): {}",
            output.status.code(),
            stderr.trim()
        )));
    }
    Ok(())
}

fn script_path(cfg: &HostPingConfig, script: &str) -> String {
    format!("{}\\{}", cfg.remote_script_dir.trim_end_matches('\\'), script)
}

/// Probes SSH, PowerShell, nping and the three remote scripts.
pub fn preflight(cfg: &HostPingConfig) -> Result<()> {
    ssh_check(cfg, "exit 0", "ssh reachability")?;
    ssh_check(cfg, "powershell -NoProfile -Command \"exit 0\"", "powershell")?;
    ssh_check(
        cfg,
        "powershell -NoProfile -Command \"if (Get-Command nping -ErrorAction SilentlyContinue) { exit 0 } else { exit 1 }\"",
        "nping",
    )?;
    for script in REMOTE_SCRIPTS {
        let path = script_path(cfg, script);
        ssh_check(
            cfg,
            &format!(
                "powershell -NoProfile -Command \"if (Test-Path '{path}') {{ exit 0 }} else {{ exit 1 }}\""
            ),
            &format!("remote script {script}"),
        )?;
    }
    info!(host = %cfg.ssh_host, "host-side ping preflight passed");
    Ok(())
}

/// The long-lived SSH session plus its tee threads.
pub struct HostPingSession {
    child: Child,
    tees: Vec<JoinHandle<()>>,
}

/// Starts the remote nping session; the remote side writes a rolling
/// log of its own, and everything it prints over SSH lands prefixed in
/// `ping_host_side.log`.
pub fn start(cfg: &HostPingConfig, dir: &Path, tz_offset_min: i32) -> Result<HostPingSession> {
    let log_path = dir.join("ping_host_side.log");
    let start_script = script_path(cfg, "start_nping.ps1");
    let remote = format!(
        "powershell -NoProfile -File \"{start_script}\" -TargetIp {} -IntervalSec {}",
        cfg.host_ip, cfg.interval_sec
    );
    let mut child = ssh_base(cfg)
        .arg(&remote)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::HostPingVerification(format!("ssh spawn failed: {e}")))?;

    let mut tees = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let file = File::create(&log_path).map_err(|e| Error::io(&log_path, e))?;
        tees.push(spawn_prefix_tee(
            "host_ping_stdout",
            stdout,
            PrefixWriter::new(file, "host_side_ping", tz_offset_min),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| Error::io(&log_path, e))?;
        tees.push(spawn_prefix_tee(
            "host_ping_stderr",
            stderr,
            PrefixWriter::new(file, "host_side_ping", tz_offset_min),
        ));
    }
    info!(host = %cfg.ssh_host, "host-side ping session started");
    Ok(HostPingSession { child, tees })
}

impl HostPingSession {
    /// Invokes the remote stop script, then terminates the SSH session.
    pub fn stop(mut self, cfg: &HostPingConfig) {
        let stop_script = script_path(cfg, "stop_nping.ps1");
        let result = ssh_base(cfg)
            .arg(format!("powershell -NoProfile -File \"{stop_script}\""))
            .output();
        match result {
            Ok(output) if output.status.success() => {
                info!("remote nping stop script completed");
            }
            Ok(output) => {
                warn!(code = ?output.status.code(), "remote nping stop script failed");
            }
            Err(e) => warn!(error = %e, "could not invoke remote stop script"),
        }
        terminate_staged("host_ping_ssh", &mut self.child);
        for tee in self.tees {
            let _ = tee.join();
        }
    }
}
