//! Error types shared by the capture and report phases.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the library. Startup-fatal kinds are the ones
/// that abort a phase before any child process is spawned; everything
/// else is degraded into per-task or per-line accounting by the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("adb not found on PATH (install platform-tools and retry)")]
    AdbMissing,

    #[error("no authorized online device (adb devices shows: {0})")]
    NoDevice(String),

    #[error("host-side ping verification failed: {0}")]
    HostPingVerification(String),

    #[error("invalid IPv4 address: {0}")]
    InvalidIpv4(String),

    #[error("invalid timezone offset {0:?} (expected ±HH:MM, magnitude <= 14h)")]
    InvalidTzOffset(String),

    #[error("SSH key file not found: {0}")]
    MissingSshKey(PathBuf),

    #[error("invalid ping interval: {0}")]
    InvalidInterval(String),

    #[error("required input missing: {0}")]
    MissingInput(PathBuf),

    #[error("no capture directory found under {0}")]
    NoCaptureDir(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV write error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("supervisor fault: {0}")]
    Fault(String),
}

impl Error {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Error::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
