// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Receive-side frame parsing.
//!
//! Safe slice parsing, no allocation. The parser understands exactly the
//! generator's wire format; anything else is an error the RX worker folds
//! into a counter.

use super::template::{ETHERTYPE_IPV4, ETHERTYPE_PTP, ETHERTYPE_VLAN, SEQ_LEN};
use super::{L3L4_LEN, L2_TAGGED_LEN, L2_UNTAGGED_LEN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unexpected EtherType {0:#06x}")]
    UnexpectedEtherType(u16),

    #[error("unexpected IP protocol {0} (want UDP)")]
    UnexpectedIpProtocol(u8),

    #[error("IP header with options (ihl={0}) not supported")]
    IpOptions(u8),

    #[error("VL-ID mismatch between MAC ({mac:#06x}) and IP ({ip:#06x})")]
    VlIdMismatch { mac: u16, ip: u16 },

    #[error("payload shorter than the sequence field")]
    MissingSequence,
}

/// EtherType of a frame plus its VLAN tag when present, without full parsing.
/// Lets the RX worker route PTP frames before touching IP headers.
pub fn peek_ethertype(frame: &[u8]) -> Option<(Option<u16>, u16)> {
    if frame.len() < L2_UNTAGGED_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < L2_TAGGED_LEN {
            return None;
        }
        let vlan = u16::from_be_bytes([frame[14], frame[15]]) & 0x0FFF;
        let inner = u16::from_be_bytes([frame[16], frame[17]]);
        Some((Some(vlan), inner))
    } else {
        Some((None, ethertype))
    }
}

/// A validated data frame. Offsets index into the original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame {
    pub vlan: Option<u16>,
    /// VL-ID from dst MAC bytes 4-5, cross-checked against dst IP bytes 2-3.
    pub vl_id: u16,
    pub seq: u64,
    /// Offset of the UDP payload (the sequence field).
    pub payload_offset: usize,
    /// UDP payload length, sequence field included.
    pub payload_len: usize,
}

impl ParsedFrame {
    pub fn parse(frame: &[u8]) -> Result<Self, ParseError> {
        let (vlan, ethertype) = peek_ethertype(frame).ok_or(ParseError::FrameTooShort {
            expected: L2_UNTAGGED_LEN,
            actual: frame.len(),
        })?;
        if ethertype == ETHERTYPE_PTP {
            return Err(ParseError::UnexpectedEtherType(ethertype));
        }
        if ethertype != ETHERTYPE_IPV4 {
            return Err(ParseError::UnexpectedEtherType(ethertype));
        }

        let l2_len = if vlan.is_some() {
            L2_TAGGED_LEN
        } else {
            L2_UNTAGGED_LEN
        };
        if frame.len() < l2_len + L3L4_LEN {
            return Err(ParseError::FrameTooShort {
                expected: l2_len + L3L4_LEN,
                actual: frame.len(),
            });
        }

        let ip = &frame[l2_len..];
        let ihl = ip[0] & 0x0F;
        if ihl != 5 {
            return Err(ParseError::IpOptions(ihl));
        }
        if ip[9] != 17 {
            return Err(ParseError::UnexpectedIpProtocol(ip[9]));
        }

        let vl_mac = u16::from_be_bytes([frame[4], frame[5]]);
        let vl_ip = u16::from_be_bytes([ip[18], ip[19]]);
        if vl_mac != vl_ip {
            return Err(ParseError::VlIdMismatch {
                mac: vl_mac,
                ip: vl_ip,
            });
        }

        let udp = &ip[20..];
        let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
        let payload_offset = l2_len + L3L4_LEN;
        let payload_len = udp_len.saturating_sub(8);
        // The UDP length field promises data; the buffer must actually hold it.
        if frame.len() < payload_offset + payload_len {
            return Err(ParseError::FrameTooShort {
                expected: payload_offset + payload_len,
                actual: frame.len(),
            });
        }
        if payload_len < SEQ_LEN {
            return Err(ParseError::MissingSequence);
        }

        let mut seq_bytes = [0u8; SEQ_LEN];
        seq_bytes.copy_from_slice(&frame[payload_offset..payload_offset + SEQ_LEN]);

        Ok(Self {
            vlan,
            vl_id: vl_mac,
            seq: u64::from_be_bytes(seq_bytes),
            payload_offset,
            payload_len,
        })
    }

    /// The PRBS portion of the payload (sequence field stripped).
    #[inline]
    pub fn prbs_payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        &frame[self.payload_offset + SEQ_LEN..self.payload_offset + self.payload_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{build_frame, FrameSpec, PrbsCache};

    fn sample(vlan: Option<u16>, vl_id: u16, seq: u64, len: usize) -> Vec<u8> {
        let prbs = PrbsCache::new(2, 0);
        let mut buf = vec![0u8; len];
        build_frame(&mut buf, &FrameSpec { vlan, vl_id }, seq, len, &prbs);
        buf
    }

    #[test]
    fn parses_generated_frame() {
        let frame = sample(Some(99), 259, 12345, 300);
        let parsed = ParsedFrame::parse(&frame).unwrap();
        assert_eq!(parsed.vlan, Some(99));
        assert_eq!(parsed.vl_id, 259);
        assert_eq!(parsed.seq, 12345);
        assert_eq!(parsed.payload_len, 300 - 18 - 28);
    }

    #[test]
    fn rejects_vl_id_mismatch() {
        let mut frame = sample(Some(99), 259, 0, 128);
        frame[4] ^= 0xFF; // corrupt MAC copy of the VL-ID
        assert!(matches!(
            ParsedFrame::parse(&frame),
            Err(ParseError::VlIdMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = sample(Some(99), 259, 0, 128);
        assert!(matches!(
            ParsedFrame::parse(&frame[..40]),
            Err(ParseError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_udp_length_beyond_buffer() {
        let mut frame = sample(Some(99), 259, 0, 128);
        // Inflate the UDP length field past the buffer end.
        let udp_len_off = 18 + 20 + 4;
        frame[udp_len_off..udp_len_off + 2].copy_from_slice(&2000u16.to_be_bytes());
        assert!(matches!(
            ParsedFrame::parse(&frame),
            Err(ParseError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_non_ipv4() {
        let mut frame = sample(None, 300, 0, 128);
        frame[12..14].copy_from_slice(&0x86DDu16.to_be_bytes());
        assert!(matches!(
            ParsedFrame::parse(&frame),
            Err(ParseError::UnexpectedEtherType(0x86DD))
        ));
    }

    #[test]
    fn peek_sees_ptp_under_vlan() {
        let mut frame = vec![0u8; 64];
        frame[12..14].copy_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        frame[14..16].copy_from_slice(&225u16.to_be_bytes());
        frame[16..18].copy_from_slice(&ETHERTYPE_PTP.to_be_bytes());
        assert_eq!(peek_ethertype(&frame), Some((Some(225), ETHERTYPE_PTP)));
    }

    #[test]
    fn vl_id_identical_through_mac_and_ip() {
        // Encoder/decoder round trip: MAC path and IP path agree by parse-time
        // cross-check; a frame that parses proves the equality.
        for vl in [3u16, 1027, 4163, 4799] {
            let frame = sample(Some(105), vl, 1, 256);
            assert_eq!(ParsedFrame::parse(&frame).unwrap().vl_id, vl);
        }
    }
}
