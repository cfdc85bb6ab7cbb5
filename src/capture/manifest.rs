//! The capture manifest (`capture_meta.json`), version 3.
//!
//! Rewritten atomically at three checkpoints: capture start, capture
//! stop, and after the report child exits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::util::write_atomic;

pub const MANIFEST_VERSION: u32 = 3;
pub const MANIFEST_FILE: &str = "capture_meta.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounters {
    pub runs: u64,
    pub ok: u64,
    pub skipped: u64,
    pub timeout: u64,
    pub error: u64,
    pub last_duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingConfigBlock {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    pub interval_sec: f64,
}

impl Default for PingConfigBlock {
    fn default() -> Self {
        PingConfigBlock {
            enabled: false,
            host_ip: None,
            interval_sec: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfigBlock {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPingConfigBlock {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    pub interval_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfigBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMeta {
    pub version: u32,
    pub started_at_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at_iso: Option<String>,
    pub output_dir: PathBuf,
    pub minutes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub device_list: Vec<String>,
    #[serde(default)]
    pub ping: PingConfigBlock,
    #[serde(default)]
    pub host_side_ping: HostPingConfigBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_exit_code: Option<i32>,
    #[serde(default)]
    pub task_counters: BTreeMap<String, TaskCounters>,
    pub ping_log_tz_offset: String,
}

impl CaptureMeta {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn read(path: &Path) -> Result<CaptureMeta> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::json(path, e))
    }

    /// Atomic rewrite (tmp + rename) so a reader never sees a torn
    /// manifest.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = Self::path_in(dir);
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| Error::json(&path, e))?;
        write_atomic(&path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = CaptureMeta {
            version: MANIFEST_VERSION,
            started_at_iso: "2024-01-01T10:00:00.000Z".into(),
            stopped_at_iso: None,
            output_dir: dir.path().to_path_buf(),
            minutes: 10,
            device_serial: Some("R5CT1234".into()),
            device_list: vec!["R5CT1234".into()],
            ping: PingConfigBlock {
                enabled: true,
                host_ip: Some("192.168.1.10".into()),
                interval_sec: 0.2,
            },
            host_side_ping: HostPingConfigBlock::default(),
            stop_reason: None,
            duration_sec: None,
            parse_exit_code: None,
            task_counters: BTreeMap::new(),
            ping_log_tz_offset: "+08:00".into(),
        };
        meta.task_counters.insert(
            "wifi".into(),
            TaskCounters {
                runs: 5,
                ok: 4,
                timeout: 1,
                ..Default::default()
            },
        );
        meta.write(dir.path()).unwrap();
        let read = CaptureMeta::read(&CaptureMeta::path_in(dir.path())).unwrap();
        assert_eq!(read.version, MANIFEST_VERSION);
        assert_eq!(read.device_serial.as_deref(), Some("R5CT1234"));
        assert_eq!(read.task_counters["wifi"].timeout, 1);
        assert!(read.ping.enabled);
    }
}
