//! Command-line surfaces for the two binaries.

use clap::Parser;
use std::path::PathBuf;

use crate::analyze::NoValidSessionPolicy;
use crate::appfocus::NoisePolicy;
use crate::session::WindowMode;

fn parse_window_mode(s: &str) -> Result<WindowMode, String> {
    WindowMode::parse(s).ok_or_else(|| format!("expected auto|strict|all, got {s:?}"))
}

fn parse_noise_policy(s: &str) -> Result<NoisePolicy, String> {
    NoisePolicy::parse(s).ok_or_else(|| format!("expected balanced|aggressive|conservative, got {s:?}"))
}

fn parse_no_valid_policy(s: &str) -> Result<NoValidSessionPolicy, String> {
    NoValidSessionPolicy::parse(s).ok_or_else(|| format!("expected empty-main|degraded, got {s:?}"))
}

/// Captures logcat, periodic dumpsys snapshots and optional dual-ended
/// ping probes from a USB-attached Android device into a timestamped
/// output directory, then invokes the report phase on the result.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jitterscope-capture",
    version,
    about,
    long_about = "Captures logcat, periodic dumpsys snapshots and optional dual-ended ping probes\n\
from a USB-attached Android device into a timestamped output directory, then\n\
invokes the report phase on the result.\n\
\n\
EXAMPLES:\n\
  # 10-minute capture, logcat + dumpsys only:\n\
  jitterscope-capture --minutes 10\n\
\n\
  # With a device-side ping against the streaming host:\n\
  jitterscope-capture --minutes 10 --host-ping-ip 192.168.1.10 --host-ping-interval-sec 0.2\n\
\n\
  # Dual-ended: also start nping on the Windows host over SSH:\n\
  jitterscope-capture --minutes 10 --host-ping-ip 192.168.1.10 \\\n\
      --host-side-ping-ip 192.168.1.23 --ssh-user gamer --ssh-key ~/.ssh/id_ed25519"
)]
pub struct CaptureArgs {
    /// Capture duration in minutes.
    #[arg(long, default_value = "10", value_name = "MIN")]
    pub minutes: u64,

    /// Root directory for capture output (a timestamped subdirectory
    /// is created under it).
    #[arg(long, default_value = "logs", value_name = "DIR")]
    pub out: PathBuf,

    /// Device serial (defaults to the first online device).
    #[arg(long, value_name = "SERIAL")]
    pub serial: Option<String>,

    /// Target IPv4 for the device-side ping (omit to disable).
    #[arg(long, value_name = "IP")]
    pub host_ping_ip: Option<String>,

    /// Device-side ping interval, seconds.
    #[arg(long, default_value = "0.2", value_name = "SEC")]
    pub host_ping_interval_sec: f64,

    /// Target IPv4 the Windows host pings (omit to disable the
    /// host-side probe).
    #[arg(long, value_name = "IP")]
    pub host_side_ping_ip: Option<String>,

    /// Host-side nping interval, seconds.
    #[arg(long, default_value = "0.2", value_name = "SEC")]
    pub host_side_ping_interval_sec: f64,

    /// SSH host for the host-side probe (defaults to the host-side
    /// ping target).
    #[arg(long, value_name = "HOST")]
    pub ssh_host: Option<String>,

    /// SSH user on the Windows host.
    #[arg(long, default_value = "Administrator", value_name = "USER")]
    pub ssh_user: String,

    /// SSH port.
    #[arg(long, default_value = "22", value_name = "PORT")]
    pub ssh_port: u16,

    /// SSH private key file.
    #[arg(long, value_name = "FILE")]
    pub ssh_key: Option<PathBuf>,

    /// Directory on the Windows host holding the nping scripts.
    #[arg(long, default_value = "C:\\jitterscope", value_name = "DIR")]
    pub remote_script_dir: String,

    /// Timezone offset recorded in ping-log prefixes (`±HH:MM`,
    /// magnitude <= 14h).
    #[arg(long, default_value = "+00:00", value_name = "OFFSET")]
    pub ping_log_tz_offset: String,

    /// Verbose logging (also honors RUST_LOG).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Analyzes one capture directory: detects streaming sessions,
/// correlates ping/dumpsys/logcat event timelines and writes the
/// Markdown report, CSV tables and the analysis manifest.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jitterscope-report",
    version,
    about,
    long_about = "Analyzes one capture directory: detects streaming sessions, correlates\n\
ping/dumpsys/logcat event timelines and writes the Markdown report, CSV tables\n\
and the analysis manifest.\n\
\n\
EXAMPLES:\n\
  jitterscope-report --latest\n\
  jitterscope-report --dir logs/20240601_183000 --stream-window-mode strict\n\
  jitterscope-report --latest --no-valid-session-policy degraded"
)]
pub struct ReportArgs {
    /// Capture directory to analyze.
    #[arg(long, value_name = "DIR", conflicts_with = "latest")]
    pub dir: Option<PathBuf>,

    /// Analyze the newest capture directory under the logs root.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub latest: bool,

    /// Logs root searched by --latest.
    #[arg(long, default_value = "logs", value_name = "DIR")]
    pub logs_root: PathBuf,

    /// Stream-window validity gate.
    #[arg(long, default_value = "auto", value_name = "MODE", value_parser = parse_window_mode)]
    pub stream_window_mode: WindowMode,

    /// App-focus noise policy.
    #[arg(long, default_value = "balanced", value_name = "POLICY", value_parser = parse_noise_policy)]
    pub noise_policy: NoisePolicy,

    /// Seconds added before each valid window.
    #[arg(long, default_value = "5", value_name = "SEC")]
    pub session_pre_buffer_sec: u32,

    /// Seconds added after each valid window.
    #[arg(long, default_value = "10", value_name = "SEC")]
    pub session_post_buffer_sec: u32,

    /// Extra expansion absorbing clock skew between sources.
    #[arg(long, default_value = "2", value_name = "SEC")]
    pub clock_skew_tolerance_sec: u32,

    /// What to render when no valid session exists.
    #[arg(long, default_value = "empty-main", value_name = "POLICY", value_parser = parse_no_valid_policy)]
    pub no_valid_session_policy: NoValidSessionPolicy,

    /// Verbose logging (also honors RUST_LOG).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}
