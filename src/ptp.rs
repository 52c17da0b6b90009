// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PTP slave engine (IEEE 1588v2, one-step, layer 2).
//!
//! 32 static sessions, one per DTN port, sharing the dedicated PTP queue.
//! A session listens for Sync on (rx_port, rx_vlan), answers with Delay_Req
//! on (tx_port, tx_vlan) after a fixed interval, and computes offset and
//! one-way delay from the t1..t4 exchange. t2/t3 are software timestamps
//! from the monotonic clock; t1/t4 arrive inside the frames.

use crate::dtn::DtnTable;
use crate::logging::{Facility, Logger};
use crate::packet::{ETHERTYPE_PTP, ETHERTYPE_VLAN, SRC_MAC};
use std::collections::HashMap;
use std::sync::Mutex;

pub const PTP_SESSION_COUNT: usize = 32;
/// Queue index PTP rides on both directions.
pub const PTP_QUEUE: u16 = 5;
/// Wait after Sync before emitting Delay_Req.
pub const DELAY_REQ_INTERVAL_MS: u64 = 100;
/// Sync silence tolerated before a session reports a retry.
pub const SYNC_TIMEOUT_NS: u64 = 3_000_000_000;
/// Delay_Resp deadline after Delay_Req.
pub const DELAY_RESP_TIMEOUT_NS: u64 = 2_000_000_000;
/// First VL-IDX stamped into Delay_Req frames; sessions step by 2.
pub const PTP_VL_IDX_BASE: u16 = 4420;

const PTP_HEADER_LEN: usize = 34;
const TIMESTAMP_LEN: usize = 10;
const PORT_IDENTITY_LEN: usize = 10;

const MSG_SYNC: u8 = 0x0;
const MSG_DELAY_REQ: u8 = 0x1;
const MSG_DELAY_RESP: u8 = 0x9;

const CTRL_SYNC: u8 = 0;
const CTRL_DELAY_REQ: u8 = 1;
const CTRL_DELAY_RESP: u8 = 3;

/// Decoded PTP message relevant to the slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpMessage {
    /// One-step Sync: origin timestamp is t1.
    Sync { seq: u16, t1_ns: u64 },
    DelayReq { seq: u16 },
    /// Delay_Resp: receive timestamp is t4.
    DelayResp { seq: u16, t4_ns: u64 },
}

fn encode_timestamp(buf: &mut [u8], ns: u64) {
    let secs = ns / 1_000_000_000;
    let nanos = (ns % 1_000_000_000) as u32;
    buf[0..2].copy_from_slice(&(((secs >> 32) & 0xFFFF) as u16).to_be_bytes());
    buf[2..6].copy_from_slice(&((secs & 0xFFFF_FFFF) as u32).to_be_bytes());
    buf[6..10].copy_from_slice(&nanos.to_be_bytes());
}

fn decode_timestamp(buf: &[u8]) -> u64 {
    let secs_hi = u16::from_be_bytes([buf[0], buf[1]]) as u64;
    let secs_lo = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as u64;
    let nanos = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as u64;
    ((secs_hi << 32) | secs_lo) * 1_000_000_000 + nanos
}

fn build_l2(vlan: u16, dst_mac: [u8; 6], ptp_len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; 18 + ptp_len];
    frame[0..6].copy_from_slice(&dst_mac);
    frame[6..12].copy_from_slice(&SRC_MAC);
    frame[12..14].copy_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
    frame[14..16].copy_from_slice(&(vlan & 0x0FFF).to_be_bytes());
    frame[16..18].copy_from_slice(&ETHERTYPE_PTP.to_be_bytes());
    frame
}

fn fill_header(ptp: &mut [u8], msg_type: u8, msg_len: usize, seq: u16, control: u8) {
    ptp[0] = msg_type & 0x0F;
    ptp[1] = 0x02; // versionPTP
    ptp[2..4].copy_from_slice(&(msg_len as u16).to_be_bytes());
    // domain, flags, correction, reserved stay zero (one-step).
    // sourcePortIdentity: EUI-64 from the source MAC, port number 1.
    ptp[20..23].copy_from_slice(&SRC_MAC[0..3]);
    ptp[23] = 0xFF;
    ptp[24] = 0xFE;
    ptp[25..28].copy_from_slice(&SRC_MAC[3..6]);
    ptp[28..30].copy_from_slice(&1u16.to_be_bytes());
    ptp[30..32].copy_from_slice(&seq.to_be_bytes());
    ptp[32] = control;
    ptp[33] = 0x7F; // logMessageInterval: unspecified
}

/// Sync frame (62 B on the wire). Used by tests and bench masters.
pub fn build_sync(vlan: u16, seq: u16, t1_ns: u64) -> Vec<u8> {
    let len = PTP_HEADER_LEN + TIMESTAMP_LEN;
    let mut frame = build_l2(vlan, [0x01, 0x1B, 0x19, 0x00, 0x00, 0x00], len);
    let ptp = &mut frame[18..];
    fill_header(ptp, MSG_SYNC, len, seq, CTRL_SYNC);
    encode_timestamp(&mut ptp[PTP_HEADER_LEN..], t1_ns);
    frame
}

/// Delay_Req frame (62 B). The session's VL-IDX rides in dst MAC bytes 4-5.
pub fn build_delay_req(vlan: u16, vl_idx: u16, seq: u16, t3_ns: u64) -> Vec<u8> {
    let len = PTP_HEADER_LEN + TIMESTAMP_LEN;
    let vl = vl_idx.to_be_bytes();
    let mut frame = build_l2(vlan, [0x03, 0x00, 0x00, 0x00, vl[0], vl[1]], len);
    let ptp = &mut frame[18..];
    fill_header(ptp, MSG_DELAY_REQ, len, seq, CTRL_DELAY_REQ);
    encode_timestamp(&mut ptp[PTP_HEADER_LEN..], t3_ns);
    frame
}

/// Delay_Resp frame (72 B). Used by tests and bench masters.
pub fn build_delay_resp(vlan: u16, seq: u16, t4_ns: u64) -> Vec<u8> {
    let len = PTP_HEADER_LEN + TIMESTAMP_LEN + PORT_IDENTITY_LEN;
    let mut frame = build_l2(vlan, [0x01, 0x1B, 0x19, 0x00, 0x00, 0x00], len);
    let ptp = &mut frame[18..];
    fill_header(ptp, MSG_DELAY_RESP, len, seq, CTRL_DELAY_RESP);
    encode_timestamp(&mut ptp[PTP_HEADER_LEN..], t4_ns);
    frame
}

/// Decode a VLAN-tagged PTP frame; returns the VLAN and the message.
pub fn parse_ptp(frame: &[u8]) -> Option<(u16, PtpMessage)> {
    if frame.len() < 18 + PTP_HEADER_LEN + TIMESTAMP_LEN {
        return None;
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_VLAN
        || u16::from_be_bytes([frame[16], frame[17]]) != ETHERTYPE_PTP
    {
        return None;
    }
    let vlan = u16::from_be_bytes([frame[14], frame[15]]) & 0x0FFF;
    let ptp = &frame[18..];
    let seq = u16::from_be_bytes([ptp[30], ptp[31]]);
    let ts = decode_timestamp(&ptp[PTP_HEADER_LEN..PTP_HEADER_LEN + TIMESTAMP_LEN]);
    let message = match ptp[0] & 0x0F {
        MSG_SYNC => PtpMessage::Sync { seq, t1_ns: ts },
        MSG_DELAY_REQ => PtpMessage::DelayReq { seq },
        MSG_DELAY_RESP => PtpMessage::DelayResp { seq, t4_ns: ts },
        _ => return None,
    };
    Some((vlan, message))
}

/// Static session wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpSessionConfig {
    pub rx_port: u16,
    pub rx_vlan: u16,
    pub tx_port: u16,
    pub tx_vlan: u16,
    pub tx_vl_idx: u16,
}

/// Slave state machine per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Listening for Sync.
    Idle,
    /// Sync seen; Delay_Req timer armed.
    AwaitSync,
    /// Delay_Req sent; waiting for the matching Delay_Resp.
    AwaitDelayResp,
    /// Full exchange completed; next Sync restarts the cycle.
    Converged,
}

/// Frame the engine wants transmitted on a port's PTP queue.
#[derive(Debug, Clone)]
pub struct PtpTxRequest {
    pub port: u16,
    pub frame: Vec<u8>,
}

pub struct PtpSession {
    pub config: PtpSessionConfig,
    state: SessionState,
    seq: u16,
    t1_ns: u64,
    t2_ns: u64,
    t3_ns: u64,
    /// Fires the Delay_Req (AwaitSync) or expires the exchange
    /// (AwaitDelayResp).
    timer_deadline_ns: u64,
    last_sync_ns: u64,
    pub offset_ns: Option<i64>,
    pub delay_ns: Option<i64>,
    pub retries: u64,
    pub exchanges: u64,
}

impl PtpSession {
    pub fn new(config: PtpSessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            seq: 0,
            t1_ns: 0,
            t2_ns: 0,
            t3_ns: 0,
            timer_deadline_ns: 0,
            last_sync_ns: 0,
            offset_ns: None,
            delay_ns: None,
            retries: 0,
            exchanges: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn on_sync(&mut self, seq: u16, t1_ns: u64, t2_ns: u64) {
        // A new Sync always restarts the exchange, whatever the state.
        self.seq = seq;
        self.t1_ns = t1_ns;
        self.t2_ns = t2_ns;
        self.last_sync_ns = t2_ns;
        self.state = SessionState::AwaitSync;
        self.timer_deadline_ns = t2_ns + DELAY_REQ_INTERVAL_MS * 1_000_000;
    }

    fn on_delay_resp(&mut self, seq: u16, t4_ns: u64) {
        if self.state != SessionState::AwaitDelayResp || seq != self.seq {
            return;
        }
        let master = (self.t2_ns as i128) - (self.t1_ns as i128);
        let slave = (t4_ns as i128) - (self.t3_ns as i128);
        self.offset_ns = Some(((master - slave) / 2) as i64);
        self.delay_ns = Some(((master + slave) / 2) as i64);
        self.exchanges += 1;
        self.state = SessionState::Converged;
    }

    /// Advance timers; may emit the Delay_Req.
    fn poll(&mut self, now_ns: u64) -> Option<PtpTxRequest> {
        match self.state {
            SessionState::AwaitSync if now_ns >= self.timer_deadline_ns => {
                self.t3_ns = now_ns;
                self.state = SessionState::AwaitDelayResp;
                self.timer_deadline_ns = now_ns + DELAY_RESP_TIMEOUT_NS;
                Some(PtpTxRequest {
                    port: self.config.tx_port,
                    frame: build_delay_req(
                        self.config.tx_vlan,
                        self.config.tx_vl_idx,
                        self.seq,
                        self.t3_ns,
                    ),
                })
            }
            SessionState::AwaitDelayResp if now_ns >= self.timer_deadline_ns => {
                self.retries += 1;
                self.state = SessionState::Idle;
                None
            }
            SessionState::Idle | SessionState::Converged
                if self.last_sync_ns > 0 && now_ns >= self.last_sync_ns + SYNC_TIMEOUT_NS =>
            {
                self.retries += 1;
                self.last_sync_ns = now_ns;
                self.state = SessionState::Idle;
                None
            }
            _ => None,
        }
    }
}

/// Read-only status row for reporting.
#[derive(Debug, Clone, Copy)]
pub struct PtpSessionStatus {
    pub config: PtpSessionConfig,
    pub state: SessionState,
    pub offset_ns: Option<i64>,
    pub delay_ns: Option<i64>,
    pub retries: u64,
    pub exchanges: u64,
}

/// All sessions plus the (port, vlan) dispatch index.
pub struct PtpEngine {
    sessions: Vec<Mutex<PtpSession>>,
    by_rx: HashMap<(u16, u16), usize>,
    logger: Logger,
}

impl PtpEngine {
    /// Sessions mirror the DTN map: the slave listens where the server
    /// receives each DTN port's traffic and answers on the opposite path.
    pub fn from_dtn_table(table: &DtnTable, logger: Logger) -> Self {
        let sessions: Vec<PtpSessionConfig> = table
            .entries()
            .iter()
            .map(|e| PtpSessionConfig {
                rx_port: e.tx_server_port,
                rx_vlan: e.tx_vlan,
                tx_port: e.rx_server_port,
                tx_vlan: e.rx_vlan,
                tx_vl_idx: PTP_VL_IDX_BASE + 2 * e.dtn_port,
            })
            .collect();
        Self::new(sessions, logger)
    }

    pub fn new(configs: Vec<PtpSessionConfig>, logger: Logger) -> Self {
        let mut by_rx = HashMap::new();
        for (i, c) in configs.iter().enumerate() {
            by_rx.insert((c.rx_port, c.rx_vlan), i);
        }
        let sessions = configs
            .into_iter()
            .map(|c| Mutex::new(PtpSession::new(c)))
            .collect();
        Self {
            sessions,
            by_rx,
            logger,
        }
    }

    /// Feed one received frame; `t2_ns` is the software RX timestamp.
    pub fn on_frame(&self, port: u16, vlan: Option<u16>, frame: &[u8], t2_ns: u64) {
        let Some((frame_vlan, message)) = parse_ptp(frame) else {
            return;
        };
        let vlan = vlan.unwrap_or(frame_vlan);
        let Some(&idx) = self.by_rx.get(&(port, vlan)) else {
            return;
        };
        let mut session = self.sessions[idx].lock().unwrap();
        match message {
            PtpMessage::Sync { seq, t1_ns } => session.on_sync(seq, t1_ns, t2_ns),
            PtpMessage::DelayResp { seq, t4_ns } => {
                session.on_delay_resp(seq, t4_ns);
                if session.state == SessionState::Converged {
                    let offset = session.offset_ns.unwrap_or(0);
                    let delay = session.delay_ns.unwrap_or(0);
                    self.logger.info(
                        Facility::Ptp,
                        &format!(
                            "session {}/{} converged: offset {offset} ns, delay {delay} ns",
                            session.config.rx_port, session.config.rx_vlan
                        ),
                    );
                }
            }
            PtpMessage::DelayReq { .. } => {} // slave ignores other slaves
        }
    }

    /// Advance every session's timers; returns frames to transmit.
    pub fn poll_timers(&self, now_ns: u64) -> Vec<PtpTxRequest> {
        let mut out = Vec::new();
        for session in &self.sessions {
            let mut s = session.lock().unwrap();
            if let Some(req) = s.poll(now_ns) {
                out.push(req);
            }
        }
        out
    }

    pub fn snapshot(&self) -> Vec<PtpSessionStatus> {
        self.sessions
            .iter()
            .map(|s| {
                let s = s.lock().unwrap();
                PtpSessionStatus {
                    config: s.config,
                    state: s.state,
                    offset_ns: s.offset_ns,
                    delay_ns: s.delay_ns,
                    retries: s.retries,
                    exchanges: s.exchanges,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Profile, Topology};

    const MS: u64 = 1_000_000;

    fn engine_with_one_session() -> PtpEngine {
        PtpEngine::new(
            vec![PtpSessionConfig {
                rx_port: 5,
                rx_vlan: 225,
                tx_port: 2,
                tx_vlan: 97,
                tx_vl_idx: 4420,
            }],
            Logger::for_tests(),
        )
    }

    #[test]
    fn codec_round_trips_all_messages() {
        let sync = build_sync(225, 7, 123_456_789_012);
        assert_eq!(sync.len(), 62);
        assert_eq!(
            parse_ptp(&sync),
            Some((
                225,
                PtpMessage::Sync {
                    seq: 7,
                    t1_ns: 123_456_789_012
                }
            ))
        );

        let req = build_delay_req(97, 4420, 7, 55);
        assert_eq!(req.len(), 62);
        assert_eq!(parse_ptp(&req), Some((97, PtpMessage::DelayReq { seq: 7 })));
        // VL-IDX rides in dst MAC bytes 4-5.
        assert_eq!(&req[4..6], &4420u16.to_be_bytes());

        let resp = build_delay_resp(225, 7, 999);
        assert_eq!(resp.len(), 72);
        assert_eq!(
            parse_ptp(&resp),
            Some((225, PtpMessage::DelayResp { seq: 7, t4_ns: 999 }))
        );
    }

    #[test]
    fn timestamp_codec_handles_large_values() {
        let mut buf = [0u8; 10];
        let ns = 1_700_000_000 * 1_000_000_000u64 + 123_456_789;
        encode_timestamp(&mut buf, ns);
        assert_eq!(decode_timestamp(&buf), ns);
    }

    #[test]
    fn full_exchange_computes_offset_and_delay() {
        let engine = engine_with_one_session();
        // Master clock is 1000 ns ahead; wire delay 500 ns each way.
        // t1 = 10_000 (master), t2 = 10_000 - 1000 + 500 = 9_500 (slave).
        engine.on_frame(5, Some(225), &build_sync(225, 1, 10_000), 9_500);
        assert_eq!(engine.snapshot()[0].state, SessionState::AwaitSync);

        // Timer fires: Delay_Req goes out; t3 = now.
        let t3 = 9_500 + DELAY_REQ_INTERVAL_MS * MS;
        let requests = engine.poll_timers(t3);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].port, 2);
        assert_eq!(engine.snapshot()[0].state, SessionState::AwaitDelayResp);

        // Master receives it at t4 = t3 + 1000 (offset) + 500 (wire).
        let t4 = t3 + 1_500;
        engine.on_frame(5, Some(225), &build_delay_resp(225, 1, t4), t4 + 10);
        let status = engine.snapshot()[0];
        assert_eq!(status.state, SessionState::Converged);
        assert_eq!(status.offset_ns, Some(-1_000));
        assert_eq!(status.delay_ns, Some(500));
        assert_eq!(status.exchanges, 1);
    }

    #[test]
    fn mismatched_sequence_is_ignored() {
        let engine = engine_with_one_session();
        engine.on_frame(5, Some(225), &build_sync(225, 1, 10_000), 9_500);
        engine.poll_timers(9_500 + DELAY_REQ_INTERVAL_MS * MS);
        engine.on_frame(5, Some(225), &build_delay_resp(225, 9, 1), 2);
        assert_eq!(engine.snapshot()[0].state, SessionState::AwaitDelayResp);
    }

    #[test]
    fn delay_resp_timeout_resets_with_retry() {
        let engine = engine_with_one_session();
        engine.on_frame(5, Some(225), &build_sync(225, 1, 10_000), 9_500);
        let t3 = 9_500 + DELAY_REQ_INTERVAL_MS * MS;
        engine.poll_timers(t3);
        // No Delay_Resp within the deadline.
        let requests = engine.poll_timers(t3 + DELAY_RESP_TIMEOUT_NS + 1);
        assert!(requests.is_empty());
        let status = engine.snapshot()[0];
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.retries, 1);
    }

    #[test]
    fn next_sync_restarts_from_converged() {
        let engine = engine_with_one_session();
        engine.on_frame(5, Some(225), &build_sync(225, 1, 10_000), 9_500);
        let t3 = 9_500 + DELAY_REQ_INTERVAL_MS * MS;
        engine.poll_timers(t3);
        engine.on_frame(5, Some(225), &build_delay_resp(225, 1, t3 + 100), t3 + 110);
        assert_eq!(engine.snapshot()[0].state, SessionState::Converged);

        engine.on_frame(5, Some(225), &build_sync(225, 2, 20_000), 19_500);
        assert_eq!(engine.snapshot()[0].state, SessionState::AwaitSync);
    }

    #[test]
    fn frames_for_unmapped_sessions_are_dropped() {
        let engine = engine_with_one_session();
        engine.on_frame(4, Some(225), &build_sync(225, 1, 10), 20);
        engine.on_frame(5, Some(99), &build_sync(99, 1, 10), 20);
        assert_eq!(engine.snapshot()[0].state, SessionState::Idle);
    }

    #[test]
    fn engine_builds_32_sessions_from_dtn_map() {
        let profile = Profile::load(Topology::Normal, false);
        let table = DtnTable::from_profile(&profile);
        let engine = PtpEngine::from_dtn_table(&table, Logger::for_tests());
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), PTP_SESSION_COUNT);
        // Session 0 mirrors DTN port 0: RX on port 5 VLAN 225, TX on
        // port 2 VLAN 97.
        let s0 = snapshot[0].config;
        assert_eq!(
            s0,
            PtpSessionConfig {
                rx_port: 5,
                rx_vlan: 225,
                tx_port: 2,
                tx_vlan: 97,
                tx_vl_idx: 4420,
            }
        );
        // VL indices step by 2 and stay inside the window.
        let last = snapshot[31].config.tx_vl_idx;
        assert_eq!(last, PTP_VL_IDX_BASE + 62);
        assert!(last < crate::MAX_VL_ID);
    }
}
