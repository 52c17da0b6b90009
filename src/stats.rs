// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shared counters updated from the hot path with relaxed atomics.
//!
//! Hot-path errors are recorded here and never raised; the aggregator reads
//! monotonic snapshots once per tick. Reset is a plain store of zero and is
//! idempotent.

use crate::tracker::SeqOutcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receive-side validation counters for one port (or one DTN slot).
#[derive(Default)]
pub struct RxStats {
    pub total_rx_pkts: AtomicU64,
    pub good_pkts: AtomicU64,
    pub bad_pkts: AtomicU64,
    pub bit_errors: AtomicU64,
    pub out_of_order_pkts: AtomicU64,
    pub lost_pkts: AtomicU64,
    pub duplicate_pkts: AtomicU64,
    pub short_pkts: AtomicU64,
    /// VL-ID outside every configured source block (counted, not validated).
    pub external_pkts: AtomicU64,
    /// Raw-socket traffic, kept apart so the aggregator can attribute it
    /// to the synthetic DTN rows.
    pub raw_socket_rx_pkts: AtomicU64,
    pub raw_socket_rx_bytes: AtomicU64,
}

/// Plain-value copy of [`RxStats`] taken at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RxStatsSnapshot {
    pub total_rx_pkts: u64,
    pub good_pkts: u64,
    pub bad_pkts: u64,
    pub bit_errors: u64,
    pub out_of_order_pkts: u64,
    pub lost_pkts: u64,
    pub duplicate_pkts: u64,
    pub short_pkts: u64,
    pub external_pkts: u64,
    pub raw_socket_rx_pkts: u64,
    pub raw_socket_rx_bytes: u64,
}

impl RxStats {
    pub const fn new() -> Self {
        Self {
            total_rx_pkts: AtomicU64::new(0),
            good_pkts: AtomicU64::new(0),
            bad_pkts: AtomicU64::new(0),
            bit_errors: AtomicU64::new(0),
            out_of_order_pkts: AtomicU64::new(0),
            lost_pkts: AtomicU64::new(0),
            duplicate_pkts: AtomicU64::new(0),
            short_pkts: AtomicU64::new(0),
            external_pkts: AtomicU64::new(0),
            raw_socket_rx_pkts: AtomicU64::new(0),
            raw_socket_rx_bytes: AtomicU64::new(0),
        }
    }

    /// Fold a tracker verdict into the sequence counters.
    #[inline]
    pub fn apply_seq_outcome(&self, outcome: SeqOutcome) {
        match outcome {
            SeqOutcome::InOrder => {}
            SeqOutcome::Ahead { lost } => {
                self.lost_pkts.fetch_add(lost, Ordering::Relaxed);
            }
            SeqOutcome::Reordered { recovered } => {
                self.out_of_order_pkts.fetch_add(1, Ordering::Relaxed);
                if recovered {
                    // Take the provisional loss back, but never below zero:
                    // a counter reset may land between charge and refund.
                    let mut cur = self.lost_pkts.load(Ordering::Relaxed);
                    while cur > 0 {
                        match self.lost_pkts.compare_exchange_weak(
                            cur,
                            cur - 1,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        ) {
                            Ok(_) => break,
                            Err(observed) => cur = observed,
                        }
                    }
                }
            }
            SeqOutcome::Duplicate => {
                self.duplicate_pkts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            total_rx_pkts: self.total_rx_pkts.load(Ordering::Relaxed),
            good_pkts: self.good_pkts.load(Ordering::Relaxed),
            bad_pkts: self.bad_pkts.load(Ordering::Relaxed),
            bit_errors: self.bit_errors.load(Ordering::Relaxed),
            out_of_order_pkts: self.out_of_order_pkts.load(Ordering::Relaxed),
            lost_pkts: self.lost_pkts.load(Ordering::Relaxed),
            duplicate_pkts: self.duplicate_pkts.load(Ordering::Relaxed),
            short_pkts: self.short_pkts.load(Ordering::Relaxed),
            external_pkts: self.external_pkts.load(Ordering::Relaxed),
            raw_socket_rx_pkts: self.raw_socket_rx_pkts.load(Ordering::Relaxed),
            raw_socket_rx_bytes: self.raw_socket_rx_bytes.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Idempotent.
    pub fn reset(&self) {
        self.total_rx_pkts.store(0, Ordering::Relaxed);
        self.good_pkts.store(0, Ordering::Relaxed);
        self.bad_pkts.store(0, Ordering::Relaxed);
        self.bit_errors.store(0, Ordering::Relaxed);
        self.out_of_order_pkts.store(0, Ordering::Relaxed);
        self.lost_pkts.store(0, Ordering::Relaxed);
        self.duplicate_pkts.store(0, Ordering::Relaxed);
        self.short_pkts.store(0, Ordering::Relaxed);
        self.external_pkts.store(0, Ordering::Relaxed);
        self.raw_socket_rx_pkts.store(0, Ordering::Relaxed);
        self.raw_socket_rx_bytes.store(0, Ordering::Relaxed);
    }
}

impl RxStatsSnapshot {
    pub fn ber(&self, rx_bytes: u64) -> f64 {
        let bits = rx_bytes.saturating_mul(8);
        if bits == 0 {
            0.0
        } else {
            self.bit_errors as f64 / bits as f64
        }
    }
}

/// Transmit-side counters for one worker or one raw target.
#[derive(Default)]
pub struct TxStats {
    pub tx_pkts: AtomicU64,
    pub tx_bytes: AtomicU64,
    /// Frames the queue accepted short of a burst (not back-pressure).
    pub tx_drops: AtomicU64,
}

impl TxStats {
    pub const fn new() -> Self {
        Self {
            tx_pkts: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            tx_drops: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn add_burst(&self, pkts: u64, bytes: u64) {
        self.tx_pkts.fetch_add(pkts, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.tx_pkts.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.tx_drops.store(0, Ordering::Relaxed);
    }

    pub fn pkts(&self) -> u64 {
        self.tx_pkts.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.tx_drops.load(Ordering::Relaxed)
    }
}
