//! Framed append format for dumpsys snapshots.
//!
//! One frame:
//! ```text
//! ### SNAPSHOT START host_ts=<iso8601> task=<name> status=OK duration_ms=42[ detail=<sanitized>]
//! <body or '[no output]'>
//! ### SNAPSHOT END
//! <blank line>
//! ```
//! The writer normalizes an empty body to the `[no output]` placeholder;
//! the reader returns body lines verbatim, so a write→parse→write cycle
//! is byte-identical.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::timeparse::{fmt_iso, parse_iso, EpochMs};
use crate::util::sanitize_detail;

const FRAME_START: &str = "### SNAPSHOT START";
const FRAME_END: &str = "### SNAPSHOT END";
const NO_OUTPUT: &str = "[no output]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapStatus {
    Ok,
    Timeout,
    Error,
    Skipped,
}

impl SnapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapStatus::Ok => "OK",
            SnapStatus::Timeout => "TIMEOUT",
            SnapStatus::Error => "ERROR",
            SnapStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(SnapStatus::Ok),
            "TIMEOUT" => Some(SnapStatus::Timeout),
            "ERROR" => Some(SnapStatus::Error),
            "SKIPPED" => Some(SnapStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub host_ts: EpochMs,
    pub task: String,
    pub status: SnapStatus,
    pub duration_ms: i64,
    pub detail: Option<String>,
    /// Body lines, verbatim, up to (not including) the trailer.
    pub body: Vec<String>,
}

impl Snapshot {
    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }
}

/// Appends snapshot frames to a writer.
pub struct SnapshotWriter<W: Write> {
    inner: W,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(inner: W) -> Self {
        SnapshotWriter { inner }
    }

    pub fn write_frame(&mut self, snap: &Snapshot) -> std::io::Result<()> {
        write!(
            self.inner,
            "{FRAME_START} host_ts={} task={} status={} duration_ms={}",
            fmt_iso(snap.host_ts),
            snap.task,
            snap.status.as_str(),
            snap.duration_ms
        )?;
        if let Some(detail) = &snap.detail {
            let clean = sanitize_detail(detail);
            if !clean.is_empty() {
                write!(self.inner, " detail={clean}")?;
            }
        }
        self.inner.write_all(b"\n")?;
        if snap.body.is_empty() {
            writeln!(self.inner, "{NO_OUTPUT}")?;
        } else {
            for line in &snap.body {
                writeln!(self.inner, "{line}")?;
            }
        }
        writeln!(self.inner, "{FRAME_END}")?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn parse_header(line: &str) -> Option<Snapshot> {
    let rest = line.strip_prefix(FRAME_START)?.trim_start();
    let mut host_ts = None;
    let mut task = None;
    let mut status = None;
    let mut duration_ms = None;
    let mut detail = None;
    for token in rest.split(' ') {
        let (key, value) = token.split_once('=')?;
        match key {
            "host_ts" => host_ts = parse_iso(value),
            "task" => task = Some(value.to_string()),
            "status" => status = SnapStatus::parse(value),
            "duration_ms" => duration_ms = value.parse::<i64>().ok(),
            "detail" => detail = Some(value.to_string()),
            // Unknown keys are tolerated for forward compatibility.
            _ => {}
        }
    }
    Some(Snapshot {
        host_ts: host_ts?,
        task: task?,
        status: status?,
        duration_ms: duration_ms?,
        detail,
        body: Vec::new(),
    })
}

/// Streaming reader over a snapshot file. Malformed frames are skipped;
/// the count of skipped frames is tracked on the reader.
pub struct SnapshotReader<R: BufRead> {
    lines: std::io::Lines<R>,
    pub malformed: u64,
}

impl<R: BufRead> SnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        SnapshotReader {
            lines: reader.lines(),
            malformed: 0,
        }
    }
}

impl<R: BufRead> Iterator for SnapshotReader<R> {
    type Item = std::io::Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        // Seek the next frame header.
        let mut snap = loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e)),
            };
            if line.starts_with(FRAME_START) {
                match parse_header(&line) {
                    Some(s) => break s,
                    None => {
                        self.malformed += 1;
                        continue;
                    }
                }
            }
        };
        // Collect the body until the trailer.
        loop {
            match self.lines.next() {
                Some(Ok(line)) if line == FRAME_END => return Some(Ok(snap)),
                Some(Ok(line)) => snap.body.push(line),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    // Truncated trailing frame (capture was killed
                    // mid-append). Return what we have.
                    return Some(Ok(snap));
                }
            }
        }
    }
}

/// Reads all frames from a file.
pub fn read_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = SnapshotReader::new(BufReader::new(file));
    let mut out = Vec::new();
    for frame in reader {
        out.push(frame.map_err(|e| Error::io(path, e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(task: &str, status: SnapStatus, dur: i64, body: &[&str]) -> Snapshot {
        Snapshot {
            host_ts: 1_700_000_000_000,
            task: task.to_string(),
            status,
            duration_ms: dur,
            detail: None,
            body: body.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn roundtrip(snaps: &[Snapshot]) -> Vec<Snapshot> {
        let mut buf = Vec::new();
        {
            let mut w = SnapshotWriter::new(&mut buf);
            for s in snaps {
                w.write_frame(s).unwrap();
            }
        }
        SnapshotReader::new(std::io::Cursor::new(buf))
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn frame_roundtrip_preserves_fields() {
        let input = vec![
            snap("wifi", SnapStatus::Ok, 42, &["Wi-Fi is enabled"]),
            snap("alarm", SnapStatus::Timeout, 20_000, &[]),
        ];
        let parsed = roundtrip(&input);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].task, "wifi");
        assert_eq!(parsed[0].status, SnapStatus::Ok);
        assert_eq!(parsed[0].duration_ms, 42);
        assert_eq!(parsed[0].body, vec!["Wi-Fi is enabled"]);
        assert_eq!(parsed[1].task, "alarm");
        assert_eq!(parsed[1].status, SnapStatus::Timeout);
        // Empty body is written as the placeholder and read back verbatim.
        assert_eq!(parsed[1].body, vec!["[no output]"]);
    }

    #[test]
    fn detail_is_sanitized_into_one_token() {
        let mut s = snap("alarm", SnapStatus::Error, 10, &[]);
        s.detail = Some("exit code 1: device  gone".to_string());
        let parsed = roundtrip(&[s]);
        assert_eq!(parsed[0].detail.as_deref(), Some("exit_code_1:_device_gone"));
    }

    #[test]
    fn reader_skips_interleaved_noise() {
        let text = format!(
            "garbage\n{FRAME_START} host_ts=2024-01-01T00:00:00.000Z task=wifi status=OK duration_ms=5\nbody\n{FRAME_END}\n\ntrailing noise\n"
        );
        let frames: Vec<_> = SnapshotReader::new(std::io::Cursor::new(text))
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, vec!["body"]);
    }

    #[test]
    fn truncated_final_frame_still_parses() {
        let text = format!(
            "{FRAME_START} host_ts=2024-01-01T00:00:00.000Z task=jobs status=OK duration_ms=9\npartial body"
        );
        let frames: Vec<_> = SnapshotReader::new(std::io::Cursor::new(text))
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, vec!["partial body"]);
    }
}
