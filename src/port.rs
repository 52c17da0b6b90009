// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Port transports.
//!
//! A port is either poll-mode (per-queue non-blocking packet sockets in a
//! fanout group, busy-polled by pinned workers) or raw-socket (one blocking
//! socket with dedicated threads, see `raw`). Both feed the same workers
//! through the [`NicQueue`] contract; an in-memory ring pair implements the
//! same contract for loopback self-tests.

use anyhow::{Context, Result};
use crossbeam_queue::ArrayQueue;
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hardware-style per-queue counters, updated by the queue implementations
/// and snapshotted by the aggregator.
#[derive(Debug, Default)]
pub struct HwQueueStats {
    pub q_opackets: AtomicU64,
    pub q_obytes: AtomicU64,
    pub q_ipackets: AtomicU64,
    pub q_ibytes: AtomicU64,
    /// Frames the queue could not accept (ring full past back-pressure).
    pub q_errors: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HwQueueSnapshot {
    pub q_opackets: u64,
    pub q_obytes: u64,
    pub q_ipackets: u64,
    pub q_ibytes: u64,
    pub q_errors: u64,
}

impl HwQueueStats {
    pub fn snapshot(&self) -> HwQueueSnapshot {
        HwQueueSnapshot {
            q_opackets: self.q_opackets.load(Ordering::Relaxed),
            q_obytes: self.q_obytes.load(Ordering::Relaxed),
            q_ipackets: self.q_ipackets.load(Ordering::Relaxed),
            q_ibytes: self.q_ibytes.load(Ordering::Relaxed),
            q_errors: self.q_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.q_opackets.store(0, Ordering::Relaxed);
        self.q_obytes.store(0, Ordering::Relaxed);
        self.q_ipackets.store(0, Ordering::Relaxed);
        self.q_ibytes.store(0, Ordering::Relaxed);
        self.q_errors.store(0, Ordering::Relaxed);
    }
}

/// One NIC queue as the workers see it. Implementations never block.
pub trait NicQueue: Send {
    /// Offer `frames` in order; returns how many the queue accepted.
    /// Zero means back-pressure; the caller spins and retries.
    fn tx_burst(&mut self, frames: &[Vec<u8>]) -> usize;

    /// Drain up to `max` frames into `out`; returns the count.
    fn rx_burst(&mut self, out: &mut Vec<Vec<u8>>, max: usize) -> usize;

    /// Shared counter block for the aggregator.
    fn counters(&self) -> Arc<HwQueueStats>;
}

pub type QueueHandle = Box<dyn NicQueue>;

/// In-memory full-duplex queue: two lock-free rings shared with a peer.
/// Used for loopback wiring in tests and ATE self-checks.
pub struct MemQueue {
    tx_ring: Arc<ArrayQueue<Vec<u8>>>,
    rx_ring: Arc<ArrayQueue<Vec<u8>>>,
    counters: Arc<HwQueueStats>,
}

impl MemQueue {
    /// A connected pair: whatever `a` transmits, `b` receives, and back.
    pub fn pair(capacity: usize) -> (MemQueue, MemQueue) {
        let ab = Arc::new(ArrayQueue::new(capacity));
        let ba = Arc::new(ArrayQueue::new(capacity));
        (
            MemQueue {
                tx_ring: Arc::clone(&ab),
                rx_ring: Arc::clone(&ba),
                counters: Arc::new(HwQueueStats::default()),
            },
            MemQueue {
                tx_ring: ba,
                rx_ring: ab,
                counters: Arc::new(HwQueueStats::default()),
            },
        )
    }

}

impl NicQueue for MemQueue {
    fn tx_burst(&mut self, frames: &[Vec<u8>]) -> usize {
        let mut accepted = 0;
        for frame in frames {
            if self.tx_ring.push(frame.clone()).is_err() {
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
            match self.rx_ring.pop() {
                Some(frame) => {
                    self.counters.q_ipackets.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .q_ibytes
                        .fetch_add(frame.len() as u64, Ordering::Relaxed);
                    out.push(frame);
                    received += 1;
                }
                None => break,
            }
        }
        received
    }

    fn counters(&self) -> Arc<HwQueueStats> {
        Arc::clone(&self.counters)
    }
}

/// Open an AF_PACKET socket bound to `interface`.
///
/// `fanout_group`, when set, joins the socket to a PACKET_FANOUT_HASH group
/// so the kernel spreads flows across a port's RX queues the way NIC RSS
/// would. Non-blocking for poll-mode queues, blocking for raw ports.
pub fn open_packet_socket(
    interface: &str,
    fanout_group: Option<u16>,
    nonblocking: bool,
) -> Result<OwnedFd> {
    let if_name = CString::new(interface)?;
    let if_index = unsafe { libc::if_nametoindex(if_name.as_ptr()) };
    if if_index == 0 {
        anyhow::bail!("interface '{}' not found", interface);
    }

    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            (libc::ETH_P_ALL as u16).to_be() as i32,
        )
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("AF_PACKET socket for '{interface}'"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut sockaddr_ll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    sockaddr_ll.sll_family = libc::AF_PACKET as u16;
    sockaddr_ll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    sockaddr_ll.sll_ifindex = if_index as i32;
    let bound = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sockaddr_ll as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if bound < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("bind to interface '{interface}'"));
    }

    if let Some(group) = fanout_group {
        const PACKET_FANOUT: libc::c_int = 18;
        const PACKET_FANOUT_HASH: u32 = 0;
        let arg: u32 = (group as u32) | (PACKET_FANOUT_HASH << 16);
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_PACKET,
                PACKET_FANOUT,
                &arg as *const _ as *const libc::c_void,
                std::mem::size_of::<u32>() as u32,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("PACKET_FANOUT on '{interface}'"));
        }
    }

    if nonblocking {
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0
            || unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
        {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("O_NONBLOCK on '{interface}'"));
        }
    }

    Ok(fd)
}

/// Poll-mode queue over a non-blocking fanout packet socket.
pub struct AfPacketQueue {
    fd: OwnedFd,
    counters: Arc<HwQueueStats>,
    rx_scratch: Vec<u8>,
}

impl AfPacketQueue {
    pub fn open(interface: &str, fanout_group: Option<u16>) -> Result<Self> {
        let fd = open_packet_socket(interface, fanout_group, true)?;
        Ok(Self {
            fd,
            counters: Arc::new(HwQueueStats::default()),
            rx_scratch: vec![0u8; crate::MAX_FRAME_LEN + 64],
        })
    }
}

impl NicQueue for AfPacketQueue {
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
                let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                if errno != libc::EAGAIN && errno != libc::ENOBUFS {
                    self.counters.q_errors.fetch_add(1, Ordering::Relaxed);
                }
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
                break; // EAGAIN or error; the poll loop comes back around
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

/// Queue sets for one poll-mode port, handed to workers at start.
pub struct PollModePort {
    pub port_id: u16,
    pub tx_queues: Vec<QueueHandle>,
    pub rx_queues: Vec<QueueHandle>,
    /// Counter blocks retained for the aggregator after queues move into
    /// their workers. Index = queue id.
    pub tx_counters: Vec<Arc<HwQueueStats>>,
    pub rx_counters: Vec<Arc<HwQueueStats>>,
}

impl PollModePort {
    pub fn new(port_id: u16, tx_queues: Vec<QueueHandle>, rx_queues: Vec<QueueHandle>) -> Self {
        let tx_counters = tx_queues.iter().map(|q| q.counters()).collect();
        let rx_counters = rx_queues.iter().map(|q| q.counters()).collect();
        Self {
            port_id,
            tx_queues,
            rx_queues,
            tx_counters,
            rx_counters,
        }
    }

    /// Open queues over AF_PACKET on `interface`; RX queues share one fanout
    /// group so the kernel spreads flows queue-like across workers.
    pub fn open(port_id: u16, interface: &str, tx_queues: usize, rx_queues: usize) -> Result<Self> {
        let fanout_group = 0x4000 | port_id;
        let mut tx = Vec::with_capacity(tx_queues);
        for _ in 0..tx_queues {
            tx.push(Box::new(AfPacketQueue::open(interface, None)?) as QueueHandle);
        }
        let mut rx = Vec::with_capacity(rx_queues);
        for _ in 0..rx_queues {
            rx.push(Box::new(AfPacketQueue::open(interface, Some(fanout_group))?) as QueueHandle);
        }
        Ok(Self::new(port_id, tx, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_pair_is_full_duplex() {
        let (mut a, mut b) = MemQueue::pair(16);
        assert_eq!(a.tx_burst(&[vec![1, 2, 3], vec![4, 5]]), 2);
        let mut got = Vec::new();
        assert_eq!(b.rx_burst(&mut got, 32), 2);
        assert_eq!(got[0], vec![1, 2, 3]);
        assert_eq!(got[1], vec![4, 5]);

        assert_eq!(b.tx_burst(&[vec![9]]), 1);
        let mut back = Vec::new();
        assert_eq!(a.rx_burst(&mut back, 32), 1);
        assert_eq!(back[0], vec![9]);
    }

    #[test]
    fn mem_queue_backpressures_when_full() {
        let (mut a, _b) = MemQueue::pair(2);
        let frames = vec![vec![0u8; 10]; 4];
        assert_eq!(a.tx_burst(&frames), 2);
        assert_eq!(a.tx_burst(&frames), 0);
    }

    #[test]
    fn mem_queue_counters_track_traffic() {
        let (mut a, mut b) = MemQueue::pair(8);
        a.tx_burst(&[vec![0u8; 100], vec![0u8; 50]]);
        let mut got = Vec::new();
        b.rx_burst(&mut got, 32);

        let tx = a.counters().snapshot();
        assert_eq!(tx.q_opackets, 2);
        assert_eq!(tx.q_obytes, 150);
        let rx = b.counters().snapshot();
        assert_eq!(rx.q_ipackets, 2);
        assert_eq!(rx.q_ibytes, 150);
    }

    #[test]
    fn rx_burst_respects_max() {
        let (mut a, mut b) = MemQueue::pair(64);
        let frames: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8]).collect();
        a.tx_burst(&frames);
        let mut got = Vec::new();
        assert_eq!(b.rx_burst(&mut got, 4), 4);
        assert_eq!(b.rx_burst(&mut got, 100), 6);
    }

    #[test]
    fn hw_stats_reset_zeroes() {
        let stats = HwQueueStats::default();
        stats.q_opackets.store(5, Ordering::Relaxed);
        stats.reset();
        assert_eq!(stats.snapshot(), HwQueueSnapshot::default());
    }

    #[test]
    fn open_packet_socket_rejects_unknown_interface() {
        let err = open_packet_socket("does-not-exist0", None, true).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn poll_mode_port_retains_counters() {
        let (a, _b) = MemQueue::pair(8);
        let (c, _d) = MemQueue::pair(8);
        let port = PollModePort::new(0, vec![Box::new(a)], vec![Box::new(c)]);
        assert_eq!(port.tx_counters.len(), 1);
        assert_eq!(port.rx_counters.len(), 1);
    }
}
