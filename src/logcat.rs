//! Pattern-based logcat classifier.
//!
//! Maps one threadtime line to zero or more system event types, with
//! context gates so generic tokens (`roam`, `connect`, `idle`) only
//! fire inside the subsystem they belong to. A separate noise filter
//! drops three known chatter classes before classification and counts
//! each drop by reason.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::event::EventType;
use crate::timeparse::ThreadtimeLine;

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).expect(stringify!($name)));
    };
}

// --- Context gates ---
re!(
    NETWORK_CONTEXT,
    r"(?i)(wifi|wlan\d?|supplicant|NetworkMonitor|Connectivity|netd|dhcp|CaptivePortal)"
);
re!(
    NON_WIFI_ROAM,
    r"(?i)(telephony|\bims\b|cellular|volte|carrier)"
);
re!(
    POWER_CONTEXT,
    r"(?i)(DeviceIdleController|deviceidle|PowerManagerService|BatterySaver)"
);

// --- Event token families ---
re!(ROAM_RE, r"(?i)(\broam(ing|ed)?\b|CMD_TRIGGER_ROAMING|FW_ROAM)");
re!(
    SCAN_RE,
    r"(?i)(startScan|scan\s+(started|results?|done|finished)|SCAN_RESULTS_AVAILABLE)"
);
re!(
    DISCONNECT_RE,
    r"(?i)(\bdisconnect(ed|ing|ion)?\b|NETWORK_DISCONNECTION_EVENT|CMD_DISCONNECT)"
);
re!(
    CONNECT_RE,
    r"(?i)(\bconnect(ed|ing)?\b|CMD_START_CONNECT|CONNECTED_STATE)"
);
re!(DHCP_RE, r"(?i)(\bdhcp\b|RenewAddress|ip\s+renewal|IpClient.*provision)");
re!(RSSI_RE, r"(?i)(RSSI_CHANGED|rssi\s+chang|CMD_RSSI_POLL)");
re!(LINK_SPEED_RE, r"(?i)(link\s*speed|LINK_SPEED)");
re!(
    VALIDATION_RE,
    r"(?i)(\bvalidat(ed|ion|ing)\b|PROBE_HTTPS?|NETWORK_VALIDITY)"
);
re!(CAPTIVE_RE, r"(?i)captive\s*portal");
re!(
    WIFI_ON_RE,
    r"(?i)(Wi-?Fi\s+is\s+enabled|setWifiEnabled\(true\)|WIFI_STATE_ENABLED)"
);
re!(
    WIFI_OFF_RE,
    r"(?i)(Wi-?Fi\s+is\s+disabled|setWifiEnabled\(false\)|WIFI_STATE_DISABLED)"
);
re!(IFACE_UP_RE, r"(?i)(interface\s+\S*\s*(state\s+)?up|mIfaceIsUp[=: ]+true|wlan\d\s+link\s+up)");
re!(
    IFACE_DOWN_RE,
    r"(?i)(interface\s+\S*\s*(state\s+)?down|mIfaceIsUp[=: ]+false|wlan\d\s+link\s+down)"
);
re!(DOZE_LIGHT_RE, r"(?i)light");
re!(
    IDLE_ENTER_RE,
    r"(?i)(state(d)?\s*(changed)?\s*(to|:)?\s*IDLE\b|enter(ing|ed)?\s+(deep\s+|light\s+)?(doze|idle)|moved\s+to\s+IDLE)"
);
re!(
    IDLE_EXIT_RE,
    r"(?i)(state(d)?\s*(changed)?\s*(to|:)?\s*ACTIVE\b|exit(ing|ed)?\s+(deep\s+|light\s+)?(doze|idle)|becoming\s+active)"
);
re!(BATTERY_SAVER_RE, r"(?i)battery\s*saver");
re!(SAVER_ON_RE, r"(?i)\b(on|enabled|true|activat)");
re!(SAVER_OFF_RE, r"(?i)\b(off|disabled|false|deactivat)");
re!(
    WAKELOCK_RE,
    r"(?i)(acquir\w*\s+(partial\s+)?wake\s?lock|acquireWakeLock|PARTIAL_WAKE_LOCK.*ACQ)"
);

// --- Noise classes ---
re!(
    DUMPSYS_NOISE_RE,
    r"(?i)(Permission Denial:.*dump|dumpsys.*(meminfo|shell)|dump\(\) from pid)"
);
re!(
    BINDER_NOISE_RE,
    r"(?i)(Waiting for service|binder.*(thread pool|transaction init)|libbinder|linkToDeath)"
);
re!(
    PRECONNECT_POLL_RE,
    r"(?i)(preconnect|poll(ing)?\s+(server|app\s+list|status)|serverinfo\s+(request|poll))"
);

/// Noise classes dropped before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    DumpsysSelfNoise,
    BinderInit,
    PreconnectPoll,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::DumpsysSelfNoise => "dumpsys_self_noise",
            DropReason::BinderInit => "binder_init",
            DropReason::PreconnectPoll => "preconnect_poll",
        }
    }
}

/// The result of classifying one retained line.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub types: Vec<EventType>,
    /// The line records a wakelock acquisition. Not an event by
    /// itself; the correlation engine derives WAKELOCK_SPIKE minutes
    /// from the per-minute hit series.
    pub wakelock_hit: bool,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && !self.wakelock_hit
    }
}

/// Stateful classifier: owns the drop-by-reason counters.
#[derive(Debug, Default)]
pub struct LogcatClassifier {
    pub lines_seen: u64,
    pub lines_dropped: u64,
    drop_counts: BTreeMap<&'static str, u64>,
}

impl LogcatClassifier {
    pub fn new() -> Self {
        LogcatClassifier::default()
    }

    pub fn drop_counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.drop_counts
    }

    fn noise_class(line: &ThreadtimeLine) -> Option<DropReason> {
        if line.tag == "dumpsys" || DUMPSYS_NOISE_RE.is_match(&line.message) {
            return Some(DropReason::DumpsysSelfNoise);
        }
        if BINDER_NOISE_RE.is_match(&line.message) {
            return Some(DropReason::BinderInit);
        }
        if PRECONNECT_POLL_RE.is_match(&line.message) {
            return Some(DropReason::PreconnectPoll);
        }
        None
    }

    /// Classifies one line. Returns `None` when the line matched a
    /// noise class and was dropped (counted by reason).
    pub fn classify(&mut self, line: &ThreadtimeLine) -> Option<Classification> {
        self.lines_seen += 1;
        if let Some(reason) = Self::noise_class(line) {
            self.lines_dropped += 1;
            *self.drop_counts.entry(reason.as_str()).or_default() += 1;
            return None;
        }

        let mut out = Classification::default();
        let haystack = format!("{} {}", line.tag, line.message);
        let network_ctx = NETWORK_CONTEXT.is_match(&haystack);
        let power_ctx = POWER_CONTEXT.is_match(&haystack);

        if network_ctx {
            if ROAM_RE.is_match(&line.message) && !NON_WIFI_ROAM.is_match(&haystack) {
                out.types.push(EventType::Roam);
            }
            if SCAN_RE.is_match(&line.message) {
                out.types.push(EventType::Scan);
            }
            // `disconnected` contains `connected`; test disconnect first
            // and never double-classify one line into both.
            if DISCONNECT_RE.is_match(&line.message) {
                out.types.push(EventType::Disconnect);
            } else if CONNECT_RE.is_match(&line.message) {
                out.types.push(EventType::Connect);
            }
            if DHCP_RE.is_match(&haystack) {
                out.types.push(EventType::Dhcp);
            }
            if RSSI_RE.is_match(&line.message) {
                out.types.push(EventType::RssiChange);
            }
            if LINK_SPEED_RE.is_match(&line.message) {
                out.types.push(EventType::LinkSpeedChange);
            }
            if VALIDATION_RE.is_match(&line.message) {
                out.types.push(EventType::Validation);
            }
            if CAPTIVE_RE.is_match(&line.message) {
                out.types.push(EventType::CaptivePortal);
            }
            if WIFI_ON_RE.is_match(&line.message) {
                out.types.push(EventType::WifiOn);
            }
            if WIFI_OFF_RE.is_match(&line.message) {
                out.types.push(EventType::WifiOff);
            }
            if IFACE_UP_RE.is_match(&line.message) {
                out.types.push(EventType::WifiIfaceUp);
            } else if IFACE_DOWN_RE.is_match(&line.message) {
                out.types.push(EventType::WifiIfaceDown);
            }
        }

        if power_ctx {
            // Light-idle transitions map to IDLE_*, everything else in
            // the deviceidle family counts as deep doze.
            let light = DOZE_LIGHT_RE.is_match(&line.message);
            if IDLE_ENTER_RE.is_match(&line.message) {
                if light {
                    out.types.push(EventType::IdleEnter);
                } else {
                    out.types.push(EventType::DozeEnter);
                }
            } else if IDLE_EXIT_RE.is_match(&line.message) {
                if light {
                    out.types.push(EventType::IdleExit);
                } else {
                    out.types.push(EventType::DozeExit);
                }
            }
            if BATTERY_SAVER_RE.is_match(&line.message) {
                // Disambiguate by on/off tokens; a line carrying neither
                // (or both) stays unclassified.
                let on = SAVER_ON_RE.is_match(&line.message);
                let off = SAVER_OFF_RE.is_match(&line.message);
                if on && !off {
                    out.types.push(EventType::BatterySaverOn);
                } else if off && !on {
                    out.types.push(EventType::BatterySaverOff);
                }
            }
            if WAKELOCK_RE.is_match(&line.message) {
                out.wakelock_hit = true;
            }
        }

        Some(out)
    }
}
