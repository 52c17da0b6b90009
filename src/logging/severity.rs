// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log severity, graded on the syslog scale.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity of a log entry. The discriminant is the syslog code, so lower
/// means more severe and a threshold check is a single integer compare.
///
/// What each grade means for this tool: `Critical` and above end the run
/// (port bring-up failure, pool exhaustion); `Error` is a subsystem that
/// keeps limping (a PTP session stuck in retries, a refused probe);
/// `Warning` is the validation verdicts an operator acts on (bad frames,
/// sequence gaps, hardware misses); `Notice` marks lifecycle edges
/// (workers up, counters reset); `Info` is the per-tick reporting; `Debug`
/// is frame-level tracing for the bench.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// True when an entry at `self` clears the configured `threshold`.
    #[inline]
    pub const fn passes(self, threshold: Severity) -> bool {
        self.as_u8() <= threshold.as_u8()
    }

    /// Fixed-width tag for rendered log lines.
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    const ALL: [Severity; 8] = [
        Severity::Emergency,
        Severity::Alert,
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];
}

impl TryFrom<u8> for Severity {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Severity::ALL.get(code as usize).copied().ok_or(code)
    }
}

/// Accepts level names (any case) or the bare syslog code, so
/// `--log-level warning` and `--log-level 4` both work.
impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Severity::try_from(code)
                .map_err(|c| format!("severity code {c} out of range 0-7"));
        }
        Severity::ALL
            .iter()
            .find(|level| level.label().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
