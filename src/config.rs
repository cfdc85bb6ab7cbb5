//! Validated runtime configuration, converted from the raw CLI args.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::cli::{CaptureArgs, ReportArgs};
use crate::error::{Error, Result};
use crate::session::SessionBuffers;
use crate::timeparse::parse_tz_offset;

fn validate_ipv4(s: &str) -> Result<String> {
    s.parse::<Ipv4Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| Error::InvalidIpv4(s.to_string()))
}

fn validate_interval(v: f64) -> Result<f64> {
    if v.is_finite() && v >= 0.05 && v <= 60.0 {
        Ok(v)
    } else {
        Err(Error::InvalidInterval(format!("{v}")))
    }
}

#[derive(Debug, Clone)]
pub struct DevicePingConfig {
    pub host_ip: String,
    pub interval_sec: f64,
}

#[derive(Debug, Clone)]
pub struct HostPingConfig {
    pub host_ip: String,
    pub interval_sec: f64,
    pub ssh_host: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub ssh_key: PathBuf,
    pub remote_script_dir: String,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub minutes: u64,
    pub out_root: PathBuf,
    pub serial: Option<String>,
    pub device_ping: Option<DevicePingConfig>,
    pub host_ping: Option<HostPingConfig>,
    /// `±HH:MM`, recorded in the manifest and used for the ping-log
    /// line prefix.
    pub tz_offset: String,
    pub tz_offset_min: i32,
    pub verbose: bool,
}

impl CaptureConfig {
    pub fn from_args(args: &CaptureArgs) -> Result<Self> {
        let tz_offset_min = parse_tz_offset(&args.ping_log_tz_offset)
            .ok_or_else(|| Error::InvalidTzOffset(args.ping_log_tz_offset.clone()))?;

        let device_ping = match &args.host_ping_ip {
            Some(ip) => Some(DevicePingConfig {
                host_ip: validate_ipv4(ip)?,
                interval_sec: validate_interval(args.host_ping_interval_sec)?,
            }),
            None => None,
        };

        let host_ping = match &args.host_side_ping_ip {
            Some(ip) => {
                let ssh_host = args
                    .ssh_host
                    .clone()
                    .unwrap_or_else(|| ip.clone());
                let ssh_key = args.ssh_key.clone().ok_or_else(|| {
                    Error::HostPingVerification("--ssh-key is required with --host-side-ping-ip".into())
                })?;
                if !ssh_key.exists() {
                    return Err(Error::MissingSshKey(ssh_key));
                }
                Some(HostPingConfig {
                    host_ip: validate_ipv4(ip)?,
                    interval_sec: validate_interval(args.host_side_ping_interval_sec)?,
                    ssh_host,
                    ssh_user: args.ssh_user.clone(),
                    ssh_port: args.ssh_port,
                    ssh_key,
                    remote_script_dir: args.remote_script_dir.clone(),
                })
            }
            None => None,
        };

        Ok(CaptureConfig {
            minutes: args.minutes,
            out_root: args.out.clone(),
            serial: args.serial.clone(),
            device_ping,
            host_ping,
            tz_offset: args.ping_log_tz_offset.clone(),
            tz_offset_min,
            verbose: args.verbose,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub dir: Option<PathBuf>,
    pub latest_root: Option<PathBuf>,
    pub mode: crate::session::WindowMode,
    pub noise_policy: crate::appfocus::NoisePolicy,
    pub buffers: SessionBuffers,
    pub no_valid_policy: crate::analyze::NoValidSessionPolicy,
    pub verbose: bool,
}

impl From<&ReportArgs> for ReportConfig {
    fn from(args: &ReportArgs) -> Self {
        ReportConfig {
            dir: args.dir.clone(),
            latest_root: if args.latest {
                Some(args.logs_root.clone())
            } else {
                None
            },
            mode: args.stream_window_mode,
            noise_policy: args.noise_policy,
            buffers: SessionBuffers {
                pre_buffer_sec: args.session_pre_buffer_sec,
                post_buffer_sec: args.session_post_buffer_sec,
                clock_skew_tolerance_sec: args.clock_skew_tolerance_sec,
            },
            no_valid_policy: args.no_valid_session_policy,
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_validation() {
        assert!(validate_ipv4("192.168.1.10").is_ok());
        assert!(validate_ipv4("256.0.0.1").is_err());
        assert!(validate_ipv4("example.com").is_err());
    }

    #[test]
    fn interval_bounds() {
        assert!(validate_interval(0.2).is_ok());
        assert!(validate_interval(0.01).is_err());
        assert!(validate_interval(f64::NAN).is_err());
        assert!(validate_interval(120.0).is_err());
    }
}
