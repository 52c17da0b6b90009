// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry: what a producer pushes into a ring.

use super::{Facility, Severity};

/// Longest message stored per entry; the tail is cut to keep entries bounded.
pub const MAX_MESSAGE_LEN: usize = 240;

/// One formatted log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// CLOCK_MONOTONIC nanoseconds at the call site.
    pub timestamp_ns: u64,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        let message = if message.len() > MAX_MESSAGE_LEN {
            let mut end = MAX_MESSAGE_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message[..end].to_string()
        } else {
            message.to_string()
        };
        Self {
            timestamp_ns: crate::clock::now_ns(),
            severity,
            facility,
            message,
        }
    }

    /// Render one line the way the consumer writes it to a sink.
    pub fn render(&self) -> String {
        let secs = self.timestamp_ns / 1_000_000_000;
        let millis = (self.timestamp_ns / 1_000_000) % 1_000;
        format!(
            "[{secs:>6}.{millis:03}] {:<9} {:<10} {}",
            self.severity.label(),
            self.facility.as_str(),
            self.message
        )
    }
}
