// SPDX-License-Identifier: Apache-2.0 OR MIT
//! DTN-port statistics: the 34-row aggregation view.
//!
//! Rows 0-31 map (server port, queue) pairs through the fabric; row 32 is
//! raw port 12 and row 33 is raw port 13. Each 1 s tick snapshots the
//! per-queue hardware-style counters, computes deltas for Gbps, merges the
//! software validation counters, and renders the table. A port with no
//! registered counters degrades to an N/A row, never a missing one.

use crate::port::HwQueueStats;
use crate::profile::{Profile, FLOWS_PER_PORT};
use crate::stats::{RxStats, TxStats};
use std::sync::Arc;

pub const DTN_PORT_COUNT: usize = 34;
pub const DTN_POLL_SLOTS: usize = 32;
pub const DTN_RAW_PORT_12_SLOT: usize = 32;
pub const DTN_RAW_PORT_13_SLOT: usize = 33;

/// Server TX port order behind DTN slots 0..32, four slots per port.
const TX_PORT_ORDER: [u16; 8] = [2, 3, 0, 1, 4, 5, 6, 7];

const VLAN_LOOKUP_SIZE: usize = 4096;
const SLOT_INVALID: u8 = 0xFF;

/// One row's wiring: where its TX and RX counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtnMapEntry {
    pub dtn_port: u16,
    /// Server → DTN direction: the server port/queue that transmits.
    pub rx_vlan: u16,
    pub rx_server_port: u16,
    pub rx_server_queue: u16,
    /// DTN → server direction: the server port/queue that receives.
    pub tx_vlan: u16,
    pub tx_server_port: u16,
    pub tx_server_queue: u16,
}

/// The slot map plus per-slot validation counters.
pub struct DtnTable {
    entries: Vec<DtnMapEntry>,
    /// Server-RX VLAN → slot, for per-frame attribution.
    vlan_to_slot: [u8; VLAN_LOOKUP_SIZE],
    stats: Vec<Arc<RxStats>>,
}

impl DtnTable {
    pub fn from_profile(profile: &Profile) -> Self {
        let mut entries = Vec::with_capacity(DTN_POLL_SLOTS);
        for (group, &tx_port) in TX_PORT_ORDER.iter().enumerate() {
            let port = profile
                .poll_port(tx_port)
                .expect("profile covers all mapped ports");
            let peer_id = profile
                .peer_rx_port(tx_port)
                .expect("every poll port has a peer");
            let peer = profile.poll_port(peer_id).expect("peer exists");
            for q in 0..FLOWS_PER_PORT {
                entries.push(DtnMapEntry {
                    dtn_port: (group * FLOWS_PER_PORT + q) as u16,
                    rx_vlan: port.tx_vlans[q],
                    rx_server_port: tx_port,
                    rx_server_queue: q as u16,
                    tx_vlan: peer.rx_vlans[q],
                    tx_server_port: peer_id,
                    tx_server_queue: q as u16,
                });
            }
        }

        let mut vlan_to_slot = [SLOT_INVALID; VLAN_LOOKUP_SIZE];
        for entry in &entries {
            vlan_to_slot[entry.tx_vlan as usize] = entry.dtn_port as u8;
        }

        let stats = (0..DTN_PORT_COUNT)
            .map(|_| Arc::new(RxStats::new()))
            .collect();
        Self {
            entries,
            vlan_to_slot,
            stats,
        }
    }

    pub fn entries(&self) -> &[DtnMapEntry] {
        &self.entries
    }

    /// Slot for a frame received under `vlan`, if the VLAN is mapped.
    #[inline]
    pub fn slot_for_vlan(&self, vlan: u16) -> Option<usize> {
        let slot = self.vlan_to_slot[(vlan as usize) & (VLAN_LOOKUP_SIZE - 1)];
        (slot != SLOT_INVALID).then_some(slot as usize)
    }

    #[inline]
    pub fn stats(&self, slot: usize) -> Arc<RxStats> {
        Arc::clone(&self.stats[slot])
    }

    pub fn reset(&self) {
        for s in &self.stats {
            s.reset();
        }
    }
}

/// Counter handles for one port, registered with the aggregator.
pub struct PortView {
    pub port_id: u16,
    pub tx_queues: Vec<Arc<HwQueueStats>>,
    pub rx_queues: Vec<Arc<HwQueueStats>>,
    pub sw: Arc<RxStats>,
    pub tx_sw: Vec<Arc<TxStats>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    /// 34-row DTN-port view.
    Dtn,
    /// Legacy per-server-port view.
    Server,
}

/// Periodic statistics reporter.
pub struct Aggregator {
    mode: StatsMode,
    daemon: bool,
    table: Arc<DtnTable>,
    ports: Vec<PortView>,
    prev_tx_bytes: Vec<u64>,
    prev_rx_bytes: Vec<u64>,
}

fn to_gbps(bytes_delta: u64) -> f64 {
    bytes_delta as f64 * 8.0 / 1e9
}

impl Aggregator {
    pub fn new(mode: StatsMode, daemon: bool, table: Arc<DtnTable>, ports: Vec<PortView>) -> Self {
        let rows = DTN_PORT_COUNT.max(crate::MAX_PORTS);
        Self {
            mode,
            daemon,
            table,
            ports,
            prev_tx_bytes: vec![0; rows],
            prev_rx_bytes: vec![0; rows],
        }
    }

    fn port(&self, port_id: u16) -> Option<&PortView> {
        self.ports.iter().find(|p| p.port_id == port_id)
    }

    /// Forget deltas so the next tick starts from the reset counters.
    pub fn rebase(&mut self) {
        self.prev_tx_bytes.iter_mut().for_each(|v| *v = 0);
        self.prev_rx_bytes.iter_mut().for_each(|v| *v = 0);
    }

    /// Render one tick of output.
    pub fn render_tick(&mut self, warmup_complete: bool, elapsed_secs: u64) -> String {
        let mut out = String::new();
        if self.daemon {
            out.push_str(&format!(
                "\n========== [{} {} s] ==========\n",
                if warmup_complete { "TEST" } else { "WARM-UP" },
                elapsed_secs
            ));
        } else {
            out.push_str("\x1b[2J\x1b[H");
            out.push_str(&format!(
                "{} | elapsed {} s\n",
                if warmup_complete {
                    "TEST RUNNING"
                } else {
                    "WARM-UP (counters reset at the end)"
                },
                elapsed_secs
            ));
        }
        match self.mode {
            StatsMode::Dtn => self.render_dtn(&mut out),
            StatsMode::Server => self.render_server(&mut out),
        }
        for warning in self.warnings() {
            out.push_str("  WARNING: ");
            out.push_str(&warning);
            out.push('\n');
        }
        out
    }

    fn render_dtn(&mut self, out: &mut String) {
        out.push_str(
            "DTN  |        TX pkts        TX Gbps |        RX pkts        RX Gbps |       good        bad       lost    bit-err        BER\n",
        );
        let entries: Vec<DtnMapEntry> = self.table.entries().to_vec();
        for entry in entries {
            let slot = entry.dtn_port as usize;
            // DTN TX (DTN→server) = what the server received on its queue.
            let tx_side = self.port(entry.tx_server_port).and_then(|p| {
                p.rx_queues
                    .get(entry.tx_server_queue as usize)
                    .map(|q| q.snapshot())
            });
            // DTN RX (server→DTN) = what the server transmitted.
            let rx_side = self.port(entry.rx_server_port).and_then(|p| {
                p.tx_queues
                    .get(entry.rx_server_queue as usize % p.tx_queues.len().max(1))
                    .map(|q| q.snapshot())
            });
            let (Some(tx), Some(rx)) = (tx_side, rx_side) else {
                out.push_str(&format!(
                    "{:>4} |                                     N/A row (port counters unavailable)\n",
                    slot
                ));
                continue;
            };
            let tx_delta = tx.q_ibytes.saturating_sub(self.prev_tx_bytes[slot]);
            self.prev_tx_bytes[slot] = tx.q_ibytes;
            let rx_delta = rx.q_obytes.saturating_sub(self.prev_rx_bytes[slot]);
            self.prev_rx_bytes[slot] = rx.q_obytes;

            let prbs = self.table.stats(slot).snapshot();
            out.push_str(&format!(
                "{:>4} | {:>14} {:>14.3} | {:>14} {:>14.3} | {:>10} {:>10} {:>10} {:>10} {:>10.2e}\n",
                slot,
                tx.q_ipackets,
                to_gbps(tx_delta),
                rx.q_opackets,
                to_gbps(rx_delta),
                prbs.good_pkts,
                prbs.bad_pkts,
                prbs.lost_pkts,
                prbs.bit_errors,
                prbs.ber(tx.q_ibytes),
            ));
        }

        // Raw-socket rows carry aggregate software counters only.
        for (slot, port_id) in [(DTN_RAW_PORT_12_SLOT, 12u16), (DTN_RAW_PORT_13_SLOT, 13u16)] {
            match self.port(port_id) {
                Some(view) => {
                    let snap = view.sw.snapshot();
                    let delta = snap
                        .raw_socket_rx_bytes
                        .saturating_sub(self.prev_tx_bytes[slot]);
                    self.prev_tx_bytes[slot] = snap.raw_socket_rx_bytes;
                    out.push_str(&format!(
                        "{:>4} | {:>14} {:>14.3} |            N/A            N/A | {:>10} {:>10} {:>10} {:>10} {:>10.2e}\n",
                        slot,
                        snap.raw_socket_rx_pkts,
                        to_gbps(delta),
                        snap.good_pkts,
                        snap.bad_pkts,
                        snap.lost_pkts,
                        snap.bit_errors,
                        snap.ber(snap.raw_socket_rx_bytes),
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "{:>4} |                                     N/A row (port counters unavailable)\n",
                        slot
                    ));
                }
            }
        }
    }

    fn render_server(&mut self, out: &mut String) {
        out.push_str(
            "Port |        TX pkts        TX Gbps |        RX pkts        RX Gbps |       good        bad       lost    bit-err        BER\n",
        );
        for i in 0..self.ports.len() {
            let view = &self.ports[i];
            let port_id = view.port_id as usize;
            let mut tx_pkts = 0u64;
            let mut tx_bytes = 0u64;
            for q in &view.tx_queues {
                let s = q.snapshot();
                tx_pkts += s.q_opackets;
                tx_bytes += s.q_obytes;
            }
            let mut rx_pkts = 0u64;
            let mut rx_bytes = 0u64;
            for q in &view.rx_queues {
                let s = q.snapshot();
                rx_pkts += s.q_ipackets;
                rx_bytes += s.q_ibytes;
            }
            let sw = view.sw.snapshot();
            let tx_delta = tx_bytes.saturating_sub(self.prev_tx_bytes[port_id]);
            let rx_delta = rx_bytes.saturating_sub(self.prev_rx_bytes[port_id]);
            self.prev_tx_bytes[port_id] = tx_bytes;
            self.prev_rx_bytes[port_id] = rx_bytes;
            out.push_str(&format!(
                "{:>4} | {:>14} {:>14.3} | {:>14} {:>14.3} | {:>10} {:>10} {:>10} {:>10} {:>10.2e}\n",
                view.port_id,
                tx_pkts,
                to_gbps(tx_delta),
                rx_pkts,
                to_gbps(rx_delta),
                sw.good_pkts,
                sw.bad_pkts,
                sw.lost_pkts,
                sw.bit_errors,
                sw.ber(rx_bytes),
            ));
        }
    }

    /// Non-empty when any port shows validation errors or queue drops.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for view in &self.ports {
            let sw = view.sw.snapshot();
            if sw.bad_pkts > 0 {
                warnings.push(format!("port {}: {} bad frames", view.port_id, sw.bad_pkts));
            }
            if sw.bit_errors > 0 {
                warnings.push(format!(
                    "port {}: {} bit errors",
                    view.port_id, sw.bit_errors
                ));
            }
            if sw.lost_pkts > 0 {
                warnings.push(format!(
                    "port {}: {} lost frames",
                    view.port_id, sw.lost_pkts
                ));
            }
            let hw_errors: u64 = view
                .tx_queues
                .iter()
                .chain(view.rx_queues.iter())
                .map(|q| q.snapshot().q_errors)
                .sum();
            if hw_errors > 0 {
                warnings.push(format!("port {}: {} queue errors", view.port_id, hw_errors));
            }
        }
        warnings
    }

    /// Reset every counter the aggregator can reach. Idempotent.
    pub fn reset_counters(&mut self) {
        for view in &self.ports {
            view.sw.reset();
            for q in view.tx_queues.iter().chain(view.rx_queues.iter()) {
                q.reset();
            }
            for t in &view.tx_sw {
                t.reset();
            }
        }
        self.table.reset();
        self.rebase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Topology;
    use std::sync::atomic::Ordering;

    fn table() -> DtnTable {
        DtnTable::from_profile(&Profile::load(Topology::Normal, false))
    }

    #[test]
    fn map_has_32_poll_slots() {
        let t = table();
        assert_eq!(t.entries().len(), DTN_POLL_SLOTS);
        // First group: server TX port 2, VLANs 97-100, peer port 5.
        let first = t.entries()[0];
        assert_eq!(first.rx_server_port, 2);
        assert_eq!(first.rx_vlan, 97);
        assert_eq!(first.tx_server_port, 5);
        assert_eq!(first.tx_vlan, 225);
        // Slot 31: server TX port 7 queue 3, peer 0 VLAN 256.
        let last = t.entries()[31];
        assert_eq!(last.rx_server_port, 7);
        assert_eq!(last.tx_server_port, 0);
        assert_eq!(last.tx_vlan, 256);
    }

    #[test]
    fn vlan_lookup_resolves_rx_vlans() {
        let t = table();
        assert_eq!(t.slot_for_vlan(225), Some(0));
        assert_eq!(t.slot_for_vlan(226), Some(1));
        assert_eq!(t.slot_for_vlan(256), Some(31));
        assert_eq!(t.slot_for_vlan(97), None); // a TX-direction VLAN
        assert_eq!(t.slot_for_vlan(1), None);
    }

    #[test]
    fn slots_collect_independent_stats() {
        let t = table();
        t.stats(0).good_pkts.fetch_add(5, Ordering::Relaxed);
        t.stats(1).good_pkts.fetch_add(7, Ordering::Relaxed);
        assert_eq!(t.stats(0).snapshot().good_pkts, 5);
        assert_eq!(t.stats(1).snapshot().good_pkts, 7);
        t.reset();
        assert_eq!(t.stats(0).snapshot().good_pkts, 0);
    }

    fn view(port_id: u16, queues: usize) -> PortView {
        PortView {
            port_id,
            tx_queues: (0..queues).map(|_| Arc::new(HwQueueStats::default())).collect(),
            rx_queues: (0..queues).map(|_| Arc::new(HwQueueStats::default())).collect(),
            sw: Arc::new(RxStats::new()),
            tx_sw: vec![Arc::new(TxStats::new())],
        }
    }

    #[test]
    fn dtn_render_marks_missing_ports_na() {
        let t = Arc::new(table());
        // Only port 2 registered: rows needing other ports degrade to N/A.
        let mut agg = Aggregator::new(StatsMode::Dtn, true, t, vec![view(2, 4)]);
        let rendered = agg.render_tick(true, 10);
        assert!(rendered.contains("N/A row"));
        assert!(rendered.contains("[TEST 10 s]"));
    }

    #[test]
    fn gbps_uses_deltas_between_ticks() {
        let t = Arc::new(table());
        let views = vec![view(0, 4)];
        let bytes = Arc::clone(&views[0].rx_queues[0]);
        let mut agg = Aggregator::new(StatsMode::Server, true, t, views);
        bytes.q_ibytes.store(125_000_000, Ordering::Relaxed);
        let first = agg.render_tick(true, 1);
        assert!(first.contains("1.000"), "first tick shows 1 Gbps: {first}");
        // No new bytes: second tick shows zero.
        let second = agg.render_tick(true, 2);
        assert!(second.contains("0.000"), "second tick: {second}");
    }

    #[test]
    fn warnings_fire_on_errors() {
        let t = Arc::new(table());
        let views = vec![view(3, 2)];
        views[0].sw.lost_pkts.store(4, Ordering::Relaxed);
        let agg = Aggregator::new(StatsMode::Server, true, t, views);
        let w = agg.warnings();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("port 3"));
        assert!(w[0].contains("4 lost"));
    }

    #[test]
    fn reset_counters_is_idempotent() {
        let t = Arc::new(table());
        let views = vec![view(0, 1)];
        views[0].sw.good_pkts.store(9, Ordering::Relaxed);
        views[0].tx_queues[0]
            .q_opackets
            .store(10, Ordering::Relaxed);
        let mut agg = Aggregator::new(StatsMode::Server, true, t, views);
        agg.reset_counters();
        agg.reset_counters();
        assert_eq!(agg.ports[0].sw.snapshot().good_pkts, 0);
        assert_eq!(agg.ports[0].tx_queues[0].snapshot().q_opackets, 0);
        assert!(agg.warnings().is_empty());
    }
}
