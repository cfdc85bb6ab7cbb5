//! Host-side `nping` dialect: separate SENT/RCVD lines paired into
//! samples.
//!
//! Latency is derived per RCVD line by matching the best unmatched SENT
//! record: same-seq preferred, time-nearest accepted when the same-seq
//! candidate is stale. Unmatched SENTs become `no_reply` samples at
//! end-of-file, and the summary is synthesized from SENT/RCVD counts
//! when the input carries none.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::{
    finalize, strip_prefix, PingFocus, PingSample, PingStatus, PingSummary, TsSource,
};
use crate::session::{Phase, StreamDetection};
use crate::timeparse::EpochMs;

/// Hard ceiling on an accepted SENT→RCVD delta, ms.
const MAX_DELTA_MS: f64 = 60_000.0;

static SENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"SENT \(([\d.]+)s\) ICMP\b.*?\bseq=(\d+)").expect("nping SENT regex")
});
static RCVD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"RCVD \(([\d.]+)s\) ICMP\b.*?\bseq=(\d+)").expect("nping RCVD regex")
});
static NPING_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Raw packets sent:\s*(\d+).*?Rcvd:\s*(\d+).*?Lost:\s*\d+\s*\(([\d.]+)%\)")
        .expect("nping summary regex")
});

#[derive(Debug)]
struct SentRecord {
    seq: u32,
    elapsed_ms: Option<f64>,
    epoch_ms: Option<EpochMs>,
    /// Best-effort timestamp for the eventual sample.
    ts: Option<EpochMs>,
    matched: bool,
    line: String,
}

/// Streaming parser for the host-side nping log.
pub struct HostPingParser {
    interval_sec: f64,
    sents: Vec<SentRecord>,
    /// seq -> indices into `sents`, in arrival order.
    by_seq: HashMap<u32, Vec<usize>>,
    samples: Vec<PingSample>,
    summary: Option<PingSummary>,
    skipped_no_ts: u64,
    unparsed_lines: u64,
}

impl HostPingParser {
    pub fn new(interval_sec: f64) -> Self {
        HostPingParser {
            interval_sec,
            sents: Vec::new(),
            by_seq: HashMap::new(),
            samples: Vec::new(),
            summary: None,
            skipped_no_ts: 0,
            unparsed_lines: 0,
        }
    }

    fn max_gap_ms(&self) -> f64 {
        (self.interval_sec * 1_000.0 * 8.0).max(1_000.0)
    }

    fn delta_ms(sent: &SentRecord, rcvd_elapsed: Option<f64>, rcvd_epoch: Option<EpochMs>) -> Option<f64> {
        match (sent.elapsed_ms, rcvd_elapsed) {
            (Some(s), Some(r)) => Some(r - s),
            _ => match (sent.epoch_ms, rcvd_epoch) {
                (Some(s), Some(r)) => Some((r - s) as f64),
                _ => None,
            },
        }
    }

    fn delta_acceptable(&self, delta: f64) -> bool {
        delta >= 0.0 && delta <= self.max_gap_ms() && delta <= MAX_DELTA_MS
    }

    fn handle_rcvd(&mut self, raw: &str, elapsed_ms: Option<f64>, epoch_ms: Option<EpochMs>, seq: u32) {
        // Prefer the oldest unmatched same-seq SENT with an acceptable
        // delta.
        let mut chosen: Option<usize> = None;
        if let Some(indices) = self.by_seq.get(&seq) {
            for &i in indices {
                if self.sents[i].matched {
                    continue;
                }
                match Self::delta_ms(&self.sents[i], elapsed_ms, epoch_ms) {
                    Some(d) if self.delta_acceptable(d) => {
                        chosen = Some(i);
                        break;
                    }
                    // Stale or unusable same-seq candidate; fall through
                    // to the time-nearest scan.
                    _ => {}
                }
            }
        }
        if chosen.is_none() {
            // Time-nearest unmatched SENT with an acceptable delta.
            let mut best: Option<(usize, f64)> = None;
            for (i, sent) in self.sents.iter().enumerate() {
                if sent.matched {
                    continue;
                }
                if let Some(d) = Self::delta_ms(sent, elapsed_ms, epoch_ms) {
                    if self.delta_acceptable(d) {
                        match best {
                            Some((_, bd)) if bd <= d => {}
                            _ => best = Some((i, d)),
                        }
                    }
                }
            }
            chosen = best.map(|(i, _)| i);
        }

        let Some(idx) = chosen else {
            // RCVD with no pairable SENT: dropped, but counted.
            self.unparsed_lines += 1;
            return;
        };
        let delta = Self::delta_ms(&self.sents[idx], elapsed_ms, epoch_ms)
            .expect("chosen candidate had a delta");
        self.sents[idx].matched = true;
        let sent_ts = self.sents[idx].ts;
        let sent_had_epoch = self.sents[idx].epoch_ms.is_some();
        let Some(ts) = sent_ts.or(epoch_ms) else {
            self.skipped_no_ts += 1;
            return;
        };
        self.samples.push(PingSample {
            ts,
            seq: Some(seq),
            success: true,
            latency_ms: Some(delta),
            status: PingStatus::Reply,
            ts_source: if sent_had_epoch || epoch_ms.is_some() {
                TsSource::LogPrefixEpoch
            } else {
                TsSource::Unknown
            },
            phase: Phase::Unknown,
            in_session: false,
            line: raw.to_string(),
        });
    }

    pub fn push_line(&mut self, raw: &str) {
        let stripped = strip_prefix(raw);
        let payload = stripped.payload;
        let epoch = stripped.epoch_ms;

        if let Some(caps) = NPING_SUMMARY_RE.captures(payload) {
            self.summary = Some(PingSummary {
                transmitted: caps[1].parse().unwrap_or(0),
                received: caps[2].parse().unwrap_or(0),
                packet_loss_pct: caps[3].parse().unwrap_or(0.0),
                synthesized: false,
            });
            return;
        }
        if let Some(caps) = SENT_RE.captures(payload) {
            let elapsed_s: Option<f64> = caps[1].parse().ok();
            let seq: u32 = match caps[2].parse() {
                Ok(s) => s,
                Err(_) => {
                    self.unparsed_lines += 1;
                    return;
                }
            };
            let idx = self.sents.len();
            self.sents.push(SentRecord {
                seq,
                elapsed_ms: elapsed_s.map(|s| s * 1_000.0),
                epoch_ms: epoch,
                ts: epoch,
                matched: false,
                line: raw.to_string(),
            });
            self.by_seq.entry(seq).or_default().push(idx);
            return;
        }
        if let Some(caps) = RCVD_RE.captures(payload) {
            let elapsed_ms = caps[1].parse::<f64>().ok().map(|s| s * 1_000.0);
            if let Ok(seq) = caps[2].parse::<u32>() {
                self.handle_rcvd(raw, elapsed_ms, epoch, seq);
            } else {
                self.unparsed_lines += 1;
            }
            return;
        }
        if !payload.trim().is_empty() {
            self.unparsed_lines += 1;
        }
    }

    pub fn finish(mut self, detection: &StreamDetection) -> PingFocus {
        // Flush unmatched SENTs as no-reply samples.
        let mut sent_count = 0u64;
        let mut rcvd_count = 0u64;
        let sents = std::mem::take(&mut self.sents);
        for sent in &sents {
            sent_count += 1;
            if sent.matched {
                rcvd_count += 1;
                continue;
            }
            let Some(ts) = sent.ts else {
                self.skipped_no_ts += 1;
                continue;
            };
            self.samples.push(PingSample {
                ts,
                seq: Some(sent.seq),
                success: false,
                latency_ms: None,
                status: PingStatus::NoReply,
                ts_source: if sent.epoch_ms.is_some() {
                    TsSource::LogPrefixEpoch
                } else {
                    TsSource::Unknown
                },
                phase: Phase::Unknown,
                in_session: false,
                line: sent.line.clone(),
            });
        }

        let summary = self.summary.take().or_else(|| {
            if sent_count == 0 {
                return None;
            }
            let loss = (sent_count - rcvd_count) as f64 / sent_count as f64 * 100.0;
            Some(PingSummary {
                transmitted: sent_count,
                received: rcvd_count,
                packet_loss_pct: loss,
                synthesized: true,
            })
        });

        finalize(
            "host_side_ping",
            self.interval_sec,
            self.samples,
            summary,
            self.skipped_no_ts,
            self.unparsed_lines,
            detection,
        )
    }
}
