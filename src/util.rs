//! Utility helpers shared across modules.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Formats a millisecond count into a human-readable string.
#[inline]
pub fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms} ms")
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

/// Formats a `std::time::Duration` using `humantime`.
#[inline]
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Replaces whitespace runs with `_` and truncates to 240 chars.
/// Used for the snapshot-frame `detail` field so the header stays a
/// single parseable line.
pub fn sanitize_detail(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(240));
    let mut in_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !in_ws {
                out.push('_');
                in_ws = true;
            }
        } else {
            out.push(ch);
            in_ws = false;
        }
        if out.len() >= 240 {
            break;
        }
    }
    out.truncate(240);
    out
}

/// Rewrites a file atomically: write to `<path>.tmp`, then rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        f.write_all(contents).map_err(|e| Error::io(&tmp, e))?;
        f.sync_all().map_err(|e| Error::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Two-decimal fixed formatting used by the CSV/Markdown emitters.
pub fn f2(v: f64) -> String {
    format!("{v:.2}")
}

/// One-decimal fixed formatting.
pub fn f1(v: f64) -> String {
    format!("{v:.1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_detail("timed  out\nafter 20s"), "timed_out_after_20s");
        assert_eq!(sanitize_detail(""), "");
        let long = "x".repeat(500);
        assert_eq!(sanitize_detail(&long).len(), 240);
    }

    #[test]
    fn format_ms_switches_units() {
        assert_eq!(format_ms(999), "999 ms");
        assert_eq!(format_ms(1_500), "1.5 s");
    }
}
