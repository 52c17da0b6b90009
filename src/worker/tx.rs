// SPDX-License-Identifier: Apache-2.0 OR MIT
//! TX worker: stamps frames for its VL blocks and bursts them at the queue.
//!
//! One worker per (port, queue). Each flow (a VLAN with a VL block) carries
//! its own sequence counters and its own shaper. Feature flags are resolved
//! into the flow setup here, before the loop starts.

use crate::clock::Clock;
use crate::logging::{Facility, Logger};
use crate::packet::{build_frame, FrameSpec, PrbsCache, IMIX_PATTERN};
use crate::port::QueueHandle;
use crate::profile::VlBlock;
use crate::rate::{RateLimiter, WindowPacer};
use crate::stats::TxStats;
use crate::worker::StopFlag;
use crate::{BURST_SIZE, MAX_FRAME_LEN};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Shaping mode, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Byte token bucket at the flow's configured rate.
    Bucket,
    /// One frame per VL-ID per window of this many nanoseconds.
    Window(u64),
    /// No shaping; frames leave as fast as the queue accepts them.
    Unlimited,
}

/// One flow this worker generates: a VLAN tag plus a VL block.
///
/// Carries its own PRBS cache because a worker may serve several VLAN
/// slots, each keyed separately on the receive side.
#[derive(Clone)]
pub struct TxFlowSpec {
    /// None for untagged raw-socket framing.
    pub vlan: Option<u16>,
    pub vl: VlBlock,
    pub rate_mbps: u32,
    pub prbs: Arc<PrbsCache>,
}

pub struct TxWorkerParams {
    pub port_id: u16,
    pub queue_id: u16,
    /// Flows toward the fabric peer.
    pub flows: Vec<TxFlowSpec>,
    /// External sub-role flows toward a raw-socket port; independent shapers.
    pub ext_flows: Vec<TxFlowSpec>,
    pub pacing: Pacing,
    pub imix: bool,
    /// Frame length when IMIX is off.
    pub frame_len: usize,
    pub stats: Arc<TxStats>,
    /// Phase slot of this worker among `phase_total`, spreading workers
    /// across the window so bursts do not align.
    pub phase_slot: u16,
    pub phase_total: u16,
}

/// Per-flow runtime state: shaper plus sequence counters.
struct FlowState {
    spec: TxFlowSpec,
    limiter: Option<RateLimiter>,
    pacer: Option<WindowPacer>,
    sequences: Vec<u64>,
    next_vl: u16,
}

impl FlowState {
    fn new(spec: TxFlowSpec, pacing: Pacing, now: u64) -> Self {
        let (limiter, pacer) = match pacing {
            Pacing::Bucket => (Some(RateLimiter::from_mbps(spec.rate_mbps as u64, now)), None),
            Pacing::Window(window_ns) => (
                None,
                Some(WindowPacer::new(spec.vl.count as usize, window_ns, now)),
            ),
            Pacing::Unlimited => (None, None),
        };
        let count = spec.vl.count as usize;
        Self {
            spec,
            limiter,
            pacer,
            sequences: vec![0u64; count],
            next_vl: 0,
        }
    }

    /// Try to admit one frame for the next VL in round-robin order.
    /// Returns (vl_id, sequence) when the shaper grants it.
    #[inline]
    fn admit(&mut self, now: u64, frame_len: usize) -> Option<(u16, u64)> {
        let offset = self.next_vl;
        if let Some(limiter) = &mut self.limiter {
            if !limiter.try_take(now, frame_len as u64) {
                return None;
            }
        }
        if let Some(pacer) = &mut self.pacer {
            if !pacer.try_take(offset as usize, now) {
                // This lane's window is closed; move on so an open lane
                // is not starved behind it.
                self.next_vl = (self.next_vl + 1) % self.spec.vl.count;
                return None;
            }
        }
        let vl_id = self.spec.vl.nth(offset);
        let seq = self.sequences[offset as usize];
        self.sequences[offset as usize] = seq.wrapping_add(1);
        self.next_vl = (self.next_vl + 1) % self.spec.vl.count;
        Some((vl_id, seq))
    }
}

/// Main loop. Returns when the stop flag is observed.
pub fn run(
    params: TxWorkerParams,
    mut queue: QueueHandle,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
    logger: Logger,
) {
    let now = clock.now();
    let mut flows: Vec<FlowState> = params
        .flows
        .into_iter()
        .map(|f| FlowState::new(f, params.pacing, now))
        .collect();
    let mut ext_flows: Vec<FlowState> = params
        .ext_flows
        .into_iter()
        .map(|f| FlowState::new(f, params.pacing, now))
        .collect();

    // Spread workers across the IMIX cycle and their VL blocks so the
    // fabric does not see aligned bursts.
    let mut imix_idx = (params.phase_slot as usize) % IMIX_PATTERN.len();
    for f in flows.iter_mut().chain(ext_flows.iter_mut()) {
        f.next_vl = (params.phase_slot * f.spec.vl.count / params.phase_total.max(1))
            % f.spec.vl.count.max(1);
    }

    logger.notice(
        Facility::TxWorker,
        &format!(
            "port {} queue {} up: {} flows, {} external",
            params.port_id,
            params.queue_id,
            flows.len(),
            ext_flows.len()
        ),
    );

    // Per-worker slab: one burst worth of frame buffers, allocated once
    // and rewritten in place every round.
    let mut slab: Vec<Vec<u8>> = (0..BURST_SIZE).map(|_| vec![0u8; MAX_FRAME_LEN]).collect();

    'run: loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let now = clock.now();

        // Fill one burst, one frame per flow per pass so no flow starves
        // its siblings on the same queue.
        let mut staged = 0usize;
        let mut granted_any = true;
        while staged < BURST_SIZE && granted_any {
            granted_any = false;
            for flow in flows.iter_mut().chain(ext_flows.iter_mut()) {
                if staged >= BURST_SIZE {
                    break;
                }
                let frame_len = if params.imix {
                    let len = IMIX_PATTERN[imix_idx];
                    imix_idx = (imix_idx + 1) % IMIX_PATTERN.len();
                    len
                } else {
                    params.frame_len
                };
                let Some((vl_id, seq)) = flow.admit(now, frame_len) else {
                    continue;
                };
                let spec = FrameSpec {
                    vlan: flow.spec.vlan,
                    vl_id,
                };
                let buf = &mut slab[staged];
                buf.resize(MAX_FRAME_LEN, 0);
                let len = build_frame(buf, &spec, seq, frame_len, &flow.spec.prbs);
                buf.truncate(len);
                staged += 1;
                granted_any = true;
            }
        }

        if staged == 0 {
            // Shapers denied everything this pass; yield the pipeline.
            std::hint::spin_loop();
            continue;
        }

        let offered = &slab[..staged];
        loop {
            let accepted = queue.tx_burst(offered);
            if accepted == offered.len() {
                let bytes: u64 = offered.iter().map(|f| f.len() as u64).sum();
                params.stats.add_burst(accepted as u64, bytes);
                break;
            }
            if accepted == 0 {
                // Ring full: benign back-pressure, spin until space or stop.
                if stop.load(Ordering::Relaxed) {
                    break 'run;
                }
                std::hint::spin_loop();
                continue;
            }
            // Partial acceptance: count what went out, the tail stays in
            // the slab for reuse and is dropped from the wire.
            let bytes: u64 = offered[..accepted].iter().map(|f| f.len() as u64).sum();
            params.stats.add_burst(accepted as u64, bytes);
            params
                .stats
                .tx_drops
                .fetch_add((offered.len() - accepted) as u64, Ordering::Relaxed);
            break;
        }
    }

    logger.notice(
        Facility::TxWorker,
        &format!(
            "port {} queue {} down: {} pkts, {} drops",
            params.port_id,
            params.queue_id,
            params.stats.pkts(),
            params.stats.drops()
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::packet::ParsedFrame;
    use crate::port::{MemQueue, NicQueue};
    use crate::profile::VlBlock;
    use crate::worker::new_stop_flag;

    fn flow(vlan: u16, vl: VlBlock) -> TxFlowSpec {
        TxFlowSpec {
            vlan: Some(vlan),
            vl,
            rate_mbps: 0,
            prbs: Arc::new(PrbsCache::new(0, 0)),
        }
    }

    fn params(flows: Vec<TxFlowSpec>, pacing: Pacing, imix: bool) -> TxWorkerParams {
        TxWorkerParams {
            port_id: 0,
            queue_id: 0,
            flows,
            ext_flows: Vec::new(),
            pacing,
            imix,
            frame_len: 256,
            stats: Arc::new(TxStats::new()),
            phase_slot: 0,
            phase_total: 1,
        }
    }

    fn drain(queue: &mut MemQueue) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while queue.rx_burst(&mut frames, 1024) > 0 {}
        frames
    }

    #[test]
    fn worker_emits_frames_round_robin_over_block() {
        let (tx_side, mut peer) = MemQueue::pair(4096);
        let flow = flow(105, VlBlock::contiguous(1027, 4));
        let p = params(vec![flow], Pacing::Unlimited, false);
        let stats = Arc::clone(&p.stats);
        let stop = new_stop_flag();
        let stop_for_worker = Arc::clone(&stop);
        let clock = Arc::new(ManualClock::new(0));
        let handle = std::thread::spawn(move || {
            run(
                p,
                Box::new(tx_side),
                clock,
                stop_for_worker,
                Logger::for_tests(),
            );
        });
        while stats.pkts() < 8 {
            std::hint::spin_loop();
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let frames = drain(&mut peer);
        assert!(frames.len() >= 8);
        // First burst cycles VLs 1027..1030 in order.
        let vls: Vec<u16> = frames[..8]
            .iter()
            .map(|f| ParsedFrame::parse(f).unwrap().vl_id)
            .collect();
        assert_eq!(&vls[..4], &[1027, 1028, 1029, 1030]);
        assert_eq!(&vls[4..8], &[1027, 1028, 1029, 1030]);
        // Per-VL sequences increase monotonically from 0.
        let seqs: Vec<u64> = frames[..8]
            .iter()
            .map(|f| ParsedFrame::parse(f).unwrap().seq)
            .collect();
        assert_eq!(&seqs[..4], &[0, 0, 0, 0]);
        assert_eq!(&seqs[4..8], &[1, 1, 1, 1]);
    }

    #[test]
    fn imix_mode_cycles_the_size_pattern() {
        let (tx_side, mut peer) = MemQueue::pair(4096);
        let flow = flow(97, VlBlock::contiguous(3, 2));
        let p = params(vec![flow], Pacing::Unlimited, true);
        let stats = Arc::clone(&p.stats);
        let stop = new_stop_flag();
        let stop_for_worker = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            run(
                p,
                Box::new(tx_side),
                Arc::new(ManualClock::new(0)),
                stop_for_worker,
                Logger::for_tests(),
            );
        });
        while stats.pkts() < IMIX_PATTERN.len() as u64 {
            std::hint::spin_loop();
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let frames = drain(&mut peer);
        let lens: Vec<usize> = frames[..IMIX_PATTERN.len()].iter().map(|f| f.len()).collect();
        assert_eq!(lens, IMIX_PATTERN.to_vec());
    }

    #[test]
    fn window_pacing_bounds_per_lane_output() {
        // One VL, 1 ms window, clock frozen: only one frame may leave.
        let (tx_side, mut peer) = MemQueue::pair(4096);
        let flow = flow(105, VlBlock::contiguous(4099, 1));
        let p = params(vec![flow], Pacing::Window(1_000_000), false);
        let stats = Arc::clone(&p.stats);
        let stop = new_stop_flag();
        let stop_for_worker = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            run(
                p,
                Box::new(tx_side),
                Arc::new(ManualClock::new(0)),
                stop_for_worker,
                Logger::for_tests(),
            );
        });
        while stats.pkts() < 1 {
            std::hint::spin_loop();
        }
        // Give the worker time to (wrongly) emit more, then stop it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(drain(&mut peer).len(), 1);
    }

    #[test]
    fn partial_acceptance_counts_drops() {
        let flow = flow(105, VlBlock::contiguous(1027, 64));
        // Ring smaller than one burst forces partial acceptance.
        let (tx_side, _peer) = MemQueue::pair(8);
        let p = params(vec![flow], Pacing::Unlimited, false);
        let stats = Arc::clone(&p.stats);
        let stop = new_stop_flag();
        let stop_for_worker = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            run(
                p,
                Box::new(tx_side),
                Arc::new(ManualClock::new(0)),
                stop_for_worker,
                Logger::for_tests(),
            );
        });
        while stats.drops() == 0 {
            std::hint::spin_loop();
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(stats.drops() > 0);
        assert_eq!(stats.pkts(), 8);
    }
}
