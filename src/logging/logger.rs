// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handles and the per-facility registry

use super::entry::LogEntry;
use super::ringbuffer::LogRing;
use super::{Facility, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Logger handle for writing log entries.
///
/// Lightweight and clonable; the ring and the level filter are shared.
#[derive(Clone)]
pub struct Logger {
    ring: Arc<LogRing>,
    min_level: Arc<AtomicU8>,
}

impl Logger {
    pub fn new(ring: Arc<LogRing>, min_level: Arc<AtomicU8>) -> Self {
        Self { ring, min_level }
    }

    /// Standalone logger for tests: own ring, Debug level.
    pub fn for_tests() -> Self {
        Self {
            ring: Arc::new(LogRing::new(1024)),
            min_level: Arc::new(AtomicU8::new(Severity::Debug.as_u8())),
        }
    }

    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        let threshold = Severity::try_from(self.min_level.load(Ordering::Relaxed))
            .unwrap_or(Severity::Debug);
        if !severity.passes(threshold) {
            return;
        }
        self.ring.write(LogEntry::new(severity, facility, message));
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }
}

/// Registry owning one ring per facility plus the global level filter.
pub struct LogRegistry {
    rings: HashMap<Facility, Arc<LogRing>>,
    min_level: Arc<AtomicU8>,
}

const ALL_FACILITIES: [Facility; 10] = [
    Facility::Supervisor,
    Facility::TxWorker,
    Facility::RxWorker,
    Facility::RawSocket,
    Facility::Aggregator,
    Facility::Latency,
    Facility::Ptp,
    Facility::Network,
    Facility::Health,
    Facility::Test,
];

impl LogRegistry {
    pub fn new(min_level: Severity) -> Self {
        let mut rings = HashMap::new();
        for facility in ALL_FACILITIES {
            rings.insert(facility, Arc::new(LogRing::new(facility.ring_capacity())));
        }
        Self {
            rings,
            min_level: Arc::new(AtomicU8::new(min_level.as_u8())),
        }
    }

    pub fn logger(&self, facility: Facility) -> Logger {
        let ring = self
            .rings
            .get(&facility)
            .or_else(|| self.rings.get(&Facility::Supervisor))
            .expect("registry always holds the supervisor ring")
            .clone();
        Logger::new(ring, Arc::clone(&self.min_level))
    }

    pub fn set_min_level(&self, level: Severity) {
        self.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn rings(&self) -> Vec<(Facility, Arc<LogRing>)> {
        self.rings
            .iter()
            .map(|(f, r)| (*f, Arc::clone(r)))
            .collect()
    }
}
