// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Bring-up, lifecycle, shutdown
    Supervisor = 0,
    /// Traffic generation workers
    TxWorker = 1,
    /// Validation workers
    RxWorker = 2,
    /// Raw-socket copper ports
    RawSocket = 3,
    /// DTN / per-port statistics aggregation
    Aggregator = 4,
    /// One-shot latency sub-test
    Latency = 5,
    /// PTP slave engine
    Ptp = 6,
    /// Socket setup, interface queries
    Network = 7,
    /// Process health sampling
    Health = 8,
    /// Test harness and fixtures
    Test = 9,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Supervisor => "Supervisor",
            Facility::TxWorker => "TxWorker",
            Facility::RxWorker => "RxWorker",
            Facility::RawSocket => "RawSocket",
            Facility::Aggregator => "Aggregator",
            Facility::Latency => "Latency",
            Facility::Ptp => "Ptp",
            Facility::Network => "Network",
            Facility::Health => "Health",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Supervisor,
            1 => Facility::TxWorker,
            2 => Facility::RxWorker,
            3 => Facility::RawSocket,
            4 => Facility::Aggregator,
            5 => Facility::Latency,
            6 => Facility::Ptp,
            7 => Facility::Network,
            8 => Facility::Health,
            9 => Facility::Test,
            _ => Facility::Unknown,
        }
    }

    /// Facilities that log from poll loops get a deeper ring.
    pub const fn ring_capacity(self) -> usize {
        match self {
            Facility::TxWorker | Facility::RxWorker | Facility::RawSocket => 4096,
            Facility::Aggregator => 2048,
            _ => 512,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facility_round_trip() {
        for v in 0..10u8 {
            assert_eq!(Facility::from_u8(v).as_u8(), v);
        }
        assert_eq!(Facility::from_u8(200), Facility::Unknown);
    }

    #[test]
    fn facility_display() {
        assert_eq!(format!("{}", Facility::RxWorker), "RxWorker");
    }

    #[test]
    fn worker_rings_are_deeper() {
        assert!(Facility::TxWorker.ring_capacity() > Facility::Supervisor.ring_capacity());
    }
}
