// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Monotonic clock for rate limiting, latency probes, and PTP timestamps.
//!
//! All hot-path time arithmetic works on raw nanosecond ticks from
//! CLOCK_MONOTONIC so token-bucket refills are a multiply and a divide, no
//! `Instant` bookkeeping. `Clock` is a trait so limiter and pacer tests can
//! substitute a hand-advanced clock.

/// Tick frequency of [`now_ns`]: nanoseconds.
pub const CLOCK_HZ: u64 = 1_000_000_000;

/// Current CLOCK_MONOTONIC reading in nanoseconds.
#[inline]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime cannot fail for CLOCK_MONOTONIC on Linux.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * CLOCK_HZ + ts.tv_nsec as u64
}

/// Time source abstraction; the process uses [`MonotonicClock`], tests use
/// [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;

    fn hz(&self) -> u64 {
        CLOCK_HZ
    }
}

/// CLOCK_MONOTONIC-backed clock used by the running process.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> u64 {
        now_ns()
    }
}

/// Hand-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    ns: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            ns: std::sync::atomic::AtomicU64::new(start_ns),
        }
    }

    pub fn advance(&self, delta_ns: u64) {
        self.ns
            .fetch_add(delta_ns, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.ns.load(std::sync::atomic::Ordering::Relaxed)
    }
}
