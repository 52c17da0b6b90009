// SPDX-License-Identifier: Apache-2.0 OR MIT
//! One-shot latency sub-test.
//!
//! Runs before steady state, while the supervisor still owns every queue.
//! For each (port, VLAN) one probe (configurable) of maximum frame size is
//! stamped with the monotonic TX timestamp and sent; the peer port's RX
//! queues are polled for the echo until the per-probe timeout. Probes use
//! the reserved VL range so steady-state validation never confuses them
//! with PRBS traffic.

use crate::clock::Clock;
use crate::logging::{Facility, Logger};
use crate::packet::{build_frame, FrameSpec, ParsedFrame, PrbsCache, SEQ_LEN, TIMESTAMP_OFFSET};
use crate::port::PollModePort;
use crate::profile::{Profile, FLOWS_PER_PORT};
use crate::{BURST_SIZE, MAX_FRAME_LEN};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Probe frames are always full size.
pub const PROBE_FRAME_LEN: usize = 1518;

#[derive(Debug, Clone, Copy)]
pub struct LatencyConfig {
    /// Probes per (port, VLAN).
    pub probes_per_flow: u32,
    /// Per-probe echo timeout.
    pub timeout: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            probes_per_flow: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Aggregated result for one (port, VLAN).
#[derive(Debug, Clone, Copy)]
pub struct LatencyResult {
    pub tx_port: u16,
    pub rx_port: u16,
    pub vlan: u16,
    pub vl_id: u16,
    pub tx_count: u32,
    pub rx_count: u32,
    pub min_us: f64,
    pub avg_us: f64,
    pub max_us: f64,
}

impl LatencyResult {
    pub fn timed_out(&self) -> bool {
        self.rx_count == 0
    }
}

/// Collects stray probes that arrive once steady-state workers own the
/// queues (late echoes after the sub-test released them).
#[derive(Default)]
pub struct LatencyCollector {
    samples: Mutex<BTreeMap<u16, Vec<u64>>>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an echo: latency = t_rx minus the timestamp in the payload.
    pub fn on_probe(&self, parsed: &ParsedFrame, frame: &[u8], t_rx_ns: u64) {
        let Some(t_tx) = probe_timestamp(parsed, frame) else {
            return;
        };
        let latency = t_rx_ns.saturating_sub(t_tx);
        self.samples
            .lock()
            .unwrap()
            .entry(parsed.vl_id)
            .or_default()
            .push(latency);
    }

    pub fn samples_for(&self, vl_id: u16) -> Vec<u64> {
        self.samples
            .lock()
            .unwrap()
            .get(&vl_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// TX timestamp carried behind the sequence field.
fn probe_timestamp(parsed: &ParsedFrame, frame: &[u8]) -> Option<u64> {
    let off = parsed.payload_offset + TIMESTAMP_OFFSET;
    if parsed.payload_len < TIMESTAMP_OFFSET + SEQ_LEN {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame[off..off + 8]);
    Some(u64::from_be_bytes(bytes))
}

fn stamp_probe(
    buf: &mut [u8],
    vlan: u16,
    vl_id: u16,
    seq: u64,
    t_tx_ns: u64,
    prbs: &PrbsCache,
) -> usize {
    let len = build_frame(
        buf,
        &FrameSpec {
            vlan: Some(vlan),
            vl_id,
        },
        seq,
        PROBE_FRAME_LEN,
        prbs,
    );
    // Overwrite the first PRBS bytes with the TX timestamp.
    let payload = crate::packet::L2_TAGGED_LEN + crate::packet::L3L4_LEN;
    buf[payload + TIMESTAMP_OFFSET..payload + TIMESTAMP_OFFSET + 8]
        .copy_from_slice(&t_tx_ns.to_be_bytes());
    len
}

/// Run the sub-test over every poll port. Queues are borrowed for the
/// duration and handed back untouched.
pub fn run_test(
    ports: &mut BTreeMap<u16, PollModePort>,
    profile: &Profile,
    clock: &Arc<dyn Clock>,
    config: LatencyConfig,
    logger: &Logger,
) -> Vec<LatencyResult> {
    let mut results = Vec::new();
    let port_ids: Vec<u16> = ports.keys().copied().collect();

    for &tx_port in &port_ids {
        let Some(port_profile) = profile.poll_port(tx_port) else {
            continue;
        };
        let Some(rx_port) = profile.peer_rx_port(tx_port) else {
            continue;
        };
        if !ports.contains_key(&rx_port) {
            continue;
        }
        let prbs = PrbsCache::new(tx_port, 0);

        for slot in 0..FLOWS_PER_PORT {
            let vlan = port_profile.tx_vlans[slot];
            let vl_id = profile.latency_vl(tx_port, slot as u16);
            let mut latencies_ns: Vec<u64> = Vec::new();
            let mut tx_count = 0u32;

            for probe in 0..config.probes_per_flow {
                let mut buf = vec![0u8; MAX_FRAME_LEN];
                let t_tx = clock.now();
                let len = stamp_probe(&mut buf, vlan, vl_id, probe as u64, t_tx, &prbs);
                buf.truncate(len);

                {
                    let tx = ports.get_mut(&tx_port).expect("port present");
                    let queue = slot % tx.tx_queues.len().max(1);
                    let frames = [buf];
                    if tx.tx_queues[queue].tx_burst(&frames) != 1 {
                        logger.warning(
                            Facility::Latency,
                            &format!("port {tx_port} vlan {vlan}: probe enqueue refused"),
                        );
                        continue;
                    }
                }
                tx_count += 1;

                if let Some(latency) =
                    wait_for_echo(ports, rx_port, vl_id, t_tx, clock, config.timeout)
                {
                    latencies_ns.push(latency);
                }
            }

            let rx_count = latencies_ns.len() as u32;
            let (min_us, avg_us, max_us) = if latencies_ns.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let min = *latencies_ns.iter().min().unwrap() as f64 / 1_000.0;
                let max = *latencies_ns.iter().max().unwrap() as f64 / 1_000.0;
                let avg = latencies_ns.iter().sum::<u64>() as f64
                    / latencies_ns.len() as f64
                    / 1_000.0;
                (min, avg, max)
            };
            if rx_count == 0 {
                logger.warning(
                    Facility::Latency,
                    &format!("port {tx_port} vlan {vlan}: no echo within timeout"),
                );
            } else {
                logger.info(
                    Facility::Latency,
                    &format!(
                        "port {tx_port} vlan {vlan}: min/avg/max = {min_us:.1}/{avg_us:.1}/{max_us:.1} us"
                    ),
                );
            }
            results.push(LatencyResult {
                tx_port,
                rx_port,
                vlan,
                vl_id,
                tx_count,
                rx_count,
                min_us,
                avg_us,
                max_us,
            });
        }
    }
    results
}

/// Poll the receiving port's queues for the probe echo.
fn wait_for_echo(
    ports: &mut BTreeMap<u16, PollModePort>,
    rx_port: u16,
    vl_id: u16,
    t_tx_ns: u64,
    clock: &Arc<dyn Clock>,
    timeout: Duration,
) -> Option<u64> {
    let deadline = t_tx_ns + timeout.as_nanos() as u64;
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(BURST_SIZE);
    let rx = ports.get_mut(&rx_port).expect("port present");
    loop {
        for queue in rx.rx_queues.iter_mut() {
            frames.clear();
            queue.rx_burst(&mut frames, BURST_SIZE);
            for frame in &frames {
                let Ok(parsed) = ParsedFrame::parse(frame) else {
                    continue;
                };
                if parsed.vl_id != vl_id {
                    continue;
                }
                let t_rx = clock.now();
                let t_tx = probe_timestamp(&parsed, frame).unwrap_or(t_tx_ns);
                return Some(t_rx.saturating_sub(t_tx));
            }
        }
        if clock.now() >= deadline {
            return None;
        }
        std::hint::spin_loop();
    }
}
