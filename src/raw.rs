// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Raw-socket port: the poll-mode data plane's contract over a plain kernel
//! interface, for copper NICs without poll-mode support.
//!
//! One blocking AF_PACKET socket per direction, one unpinned thread each.
//! TX reuses the regular TX worker with one flow per target (independent
//! shapers, untagged framing). RX is a blocking loop with a receive
//! timeout so the stop flag is honored, feeding the same per-frame
//! validation path as the poll-mode workers.

use crate::clock::Clock;
use crate::logging::{Facility, Logger};
use crate::packet::PrbsCache;
use crate::port::{open_packet_socket, HwQueueStats, NicQueue, QueueHandle};
use crate::profile::RawPortProfile;
use crate::stats::{RxStats, TxStats};
use crate::worker::rx::RxContext;
use crate::worker::tx::{self, Pacing, TxFlowSpec, TxWorkerParams};
use crate::worker::{StopFlag, WorkerHandle};
use crate::BURST_SIZE;
use anyhow::{Context, Result};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// RX wakes up this often to check the stop flag.
const RX_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Blocking packet-socket queue for the raw transport.
#[derive(Debug)]
pub struct BlockingPacketQueue {
    fd: OwnedFd,
    counters: Arc<HwQueueStats>,
    rx_scratch: Vec<u8>,
}

impl BlockingPacketQueue {
    pub fn open(interface: &str) -> Result<Self> {
        let fd = open_packet_socket(interface, None, false)?;
        let timeout = libc::timeval {
            tv_sec: RX_POLL_TIMEOUT.as_secs() as libc::time_t,
            tv_usec: RX_POLL_TIMEOUT.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as u32,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("SO_RCVTIMEO on '{interface}'"));
        }
        Ok(Self {
            fd,
            counters: Arc::new(HwQueueStats::default()),
            rx_scratch: vec![0u8; crate::MAX_FRAME_LEN + 64],
        })
    }
}

impl NicQueue for BlockingPacketQueue {
    fn tx_burst(&mut self, frames: &[Vec<u8>]) -> usize {
        let mut accepted = 0;
        for frame in frames {
            let rc = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                )
            };
            if rc < 0 {
                self.counters.q_errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
            self.counters.q_opackets.fetch_add(1, Ordering::Relaxed);
            self.counters
                .q_obytes
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            accepted += 1;
        }
        accepted
    }

    fn rx_burst(&mut self, out: &mut Vec<Vec<u8>>, max: usize) -> usize {
        let mut received = 0;
        while received < max {
            let rc = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.rx_scratch.as_mut_ptr() as *mut libc::c_void,
                    self.rx_scratch.len(),
                    0,
                )
            };
            if rc <= 0 {
                break; // timeout (EAGAIN under SO_RCVTIMEO) or error
            }
            let frame = self.rx_scratch[..rc as usize].to_vec();
            self.counters.q_ipackets.fetch_add(1, Ordering::Relaxed);
            self.counters
                .q_ibytes
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            out.push(frame);
            received += 1;
        }
        received
    }

    fn counters(&self) -> Arc<HwQueueStats> {
        Arc::clone(&self.counters)
    }
}

/// A started raw-socket port: two threads plus its counter handles.
pub struct RawSocketPort {
    pub port_id: u16,
    pub tx_stats: Arc<TxStats>,
    pub stats: Arc<RxStats>,
    pub tx_counters: Arc<HwQueueStats>,
    pub rx_counters: Arc<HwQueueStats>,
    handles: Vec<WorkerHandle>,
}

impl RawSocketPort {
    /// Open the interface and start the TX and RX threads.
    ///
    /// `rx_ctx` must carry this port's trackers and stats; `pacing`
    /// and `frame_len` mirror the poll-mode worker configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        profile: &RawPortProfile,
        rx_ctx: RxContext,
        pacing: Pacing,
        frame_len: usize,
        clock: Arc<dyn Clock>,
        stop: StopFlag,
        logger: Logger,
    ) -> Result<Self> {
        let tx_queue = BlockingPacketQueue::open(profile.interface)
            .with_context(|| format!("raw port {} TX socket", profile.port_id))?;
        let rx_queue = BlockingPacketQueue::open(profile.interface)
            .with_context(|| format!("raw port {} RX socket", profile.port_id))?;
        Ok(Self::start_with_queues(
            profile,
            Box::new(tx_queue),
            Box::new(rx_queue),
            rx_ctx,
            pacing,
            frame_len,
            clock,
            stop,
            logger,
        ))
    }

    /// Start over caller-provided queues (loopback wiring and tests).
    #[allow(clippy::too_many_arguments)]
    pub fn start_with_queues(
        profile: &RawPortProfile,
        tx_queue: QueueHandle,
        rx_queue: QueueHandle,
        rx_ctx: RxContext,
        pacing: Pacing,
        frame_len: usize,
        clock: Arc<dyn Clock>,
        stop: StopFlag,
        logger: Logger,
    ) -> Self {
        let port_id = profile.port_id;
        let tx_stats = Arc::new(TxStats::new());
        let stats = Arc::clone(&rx_ctx.stats);
        let tx_counters = tx_queue.counters();
        let rx_counters = rx_queue.counters();

        // Raw flows are untagged; PRBS key is (port, 0).
        let prbs = Arc::new(PrbsCache::new(port_id, 0));
        let flows: Vec<TxFlowSpec> = profile
            .tx_targets
            .iter()
            .map(|t| TxFlowSpec {
                vlan: None,
                vl: t.vl,
                rate_mbps: t.rate_mbps,
                prbs: Arc::clone(&prbs),
            })
            .collect();
        let params = TxWorkerParams {
            port_id,
            queue_id: 0,
            flows,
            ext_flows: Vec::new(),
            pacing,
            imix: false, // raw targets always run fixed size
            frame_len,
            stats: Arc::clone(&tx_stats),
            phase_slot: port_id,
            phase_total: 4,
        };
        let tx_logger = logger.clone();
        let tx_stop = Arc::clone(&stop);
        let tx_clock = Arc::clone(&clock);
        let tx_handle = WorkerHandle::spawn(
            format!("raw{port_id}-tx"),
            None,
            logger.clone(),
            move || tx::run(params, tx_queue, tx_clock, tx_stop, tx_logger),
        );

        let rx_logger = logger.clone();
        let rx_stop = Arc::clone(&stop);
        let rx_handle = WorkerHandle::spawn(
            format!("raw{port_id}-rx"),
            None,
            logger,
            move || run_rx_loop(rx_ctx, rx_queue, rx_stop, rx_logger),
        );

        Self {
            port_id,
            tx_stats,
            stats,
            tx_counters,
            rx_counters,
            handles: vec![tx_handle, rx_handle],
        }
    }

    /// Hand the thread handles to the supervisor for the join phase.
    pub fn take_handles(&mut self) -> Vec<WorkerHandle> {
        std::mem::take(&mut self.handles)
    }
}

/// Blocking receive loop: identical validation, plus the raw byte counters
/// the aggregator attributes to the synthetic DTN rows.
fn run_rx_loop(ctx: RxContext, mut queue: QueueHandle, stop: StopFlag, logger: Logger) {
    logger.notice(
        Facility::RawSocket,
        &format!("raw port {} RX up", ctx.port_id),
    );
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(BURST_SIZE);
    while !stop.load(Ordering::Relaxed) {
        frames.clear();
        if queue.rx_burst(&mut frames, BURST_SIZE) == 0 {
            // Blocking sockets park in recv; memory queues would spin hot.
            std::thread::sleep(Duration::from_micros(50));
            continue;
        }
        for frame in &frames {
            ctx.stats
                .raw_socket_rx_pkts
                .fetch_add(1, Ordering::Relaxed);
            ctx.stats
                .raw_socket_rx_bytes
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            ctx.process_frame(frame);
        }
    }
    let snap = ctx.stats.snapshot();
    logger.notice(
        Facility::RawSocket,
        &format!(
            "raw port {} RX down: {} pkts, good={} bad={} lost={}",
            ctx.port_id, snap.raw_socket_rx_pkts, snap.good_pkts, snap.bad_pkts, snap.lost_pkts
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::packet::PrbsCatalog;
    use crate::port::MemQueue;
    use crate::profile::{Profile, Topology};
    use crate::tracker::PortTrackerTable;
    use crate::worker::new_stop_flag;

    /// ATE pair 12<->14 over memory queues: every counter must close.
    #[test]
    fn ate_raw_pair_loopback_validates_clean() {
        let profile = Arc::new(Profile::load(Topology::Ate, false));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let stop = new_stop_flag();

        let mut prbs = PrbsCatalog::new();
        prbs.insert(12, 0);
        prbs.insert(14, 0);
        let prbs = Arc::new(prbs);

        let (a_tx, b_rx) = MemQueue::pair(8192);
        let (b_tx, a_rx) = MemQueue::pair(8192);

        let ctx = |port_id: u16| RxContext {
            port_id,
            sources: profile.raw_port(port_id).unwrap().rx_sources.clone(),
            profile: Arc::clone(&profile),
            prbs: Arc::clone(&prbs),
            trackers: Arc::new(PortTrackerTable::new()),
            stats: Arc::new(RxStats::new()),
            dtn: None,
            latency: None,
            clock: Arc::clone(&clock),
        };

        let mut p12 = RawSocketPort::start_with_queues(
            profile.raw_port(12).unwrap(),
            Box::new(a_tx),
            Box::new(a_rx),
            ctx(12),
            Pacing::Unlimited,
            512,
            Arc::clone(&clock),
            Arc::clone(&stop),
            Logger::for_tests(),
        );
        let mut p14 = RawSocketPort::start_with_queues(
            profile.raw_port(14).unwrap(),
            Box::new(b_tx),
            Box::new(b_rx),
            ctx(14),
            Pacing::Unlimited,
            512,
            Arc::clone(&clock),
            Arc::clone(&stop),
            Logger::for_tests(),
        );

        // Let a few thousand frames cross each way.
        while p12.stats.snapshot().good_pkts < 1000 || p14.stats.snapshot().good_pkts < 1000 {
            std::thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Relaxed);
        for h in p12.take_handles().into_iter().chain(p14.take_handles()) {
            assert!(h.join_timeout(Duration::from_secs(2)));
        }

        for port in [&p12, &p14] {
            let snap = port.stats.snapshot();
            assert_eq!(snap.bad_pkts, 0, "port {}", port.port_id);
            assert_eq!(snap.bit_errors, 0, "port {}", port.port_id);
            assert_eq!(snap.external_pkts, 0, "port {}", port.port_id);
            assert_eq!(snap.raw_socket_rx_pkts, snap.total_rx_pkts);
        }
        // Whatever was received was sent by the peer (queues may still
        // hold a tail in flight).
        assert!(p12.stats.snapshot().good_pkts <= p14.tx_stats.pkts());
        assert!(p14.stats.snapshot().good_pkts <= p12.tx_stats.pkts());
    }

    #[test]
    fn open_rejects_missing_interface() {
        let err = BlockingPacketQueue::open("no-such-iface9").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
