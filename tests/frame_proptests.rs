// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property-based tests for the frame codec.
//!
//! The parser faces whatever the wire delivers; it must never panic, and
//! for frames our own template produced it must recover exactly what was
//! stamped.

use fabric_exerciser::packet::{
    build_frame, min_stamped_len, peek_ethertype, FrameSpec, ParsedFrame, PrbsCache,
};
use proptest::prelude::*;

proptest! {
    /// Arbitrary bytes: parse returns Ok or Err, never panics.
    #[test]
    fn parse_never_panics(input in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let _ = ParsedFrame::parse(&input);
        let _ = peek_ethertype(&input);
    }

    /// Any frame the template builds parses back to the same identity.
    #[test]
    fn template_round_trips(
        vlan in proptest::option::of(1u16..4095),
        vl_id in 3u16..4800,
        seq in any::<u64>(),
        extra in 0usize..1400,
    ) {
        let tagged = vlan.is_some();
        let frame_len = min_stamped_len(tagged) + extra;
        let prbs = PrbsCache::new(2, 1);
        let mut buf = vec![0u8; frame_len];
        let written = build_frame(&mut buf, &FrameSpec { vlan, vl_id }, seq, frame_len, &prbs);
        prop_assert_eq!(written, frame_len);

        let parsed = ParsedFrame::parse(&buf).unwrap();
        prop_assert_eq!(parsed.vlan, vlan);
        prop_assert_eq!(parsed.vl_id, vl_id);
        prop_assert_eq!(parsed.seq, seq);

        // Payload verifies against the same cache.
        let (ok, bit_errors) = prbs.compare(vl_id, parsed.prbs_payload(&buf));
        prop_assert!(ok);
        prop_assert_eq!(bit_errors, 0);
    }

    /// Truncating a valid frame anywhere never panics the parser and never
    /// yields a frame longer than the buffer.
    #[test]
    fn truncation_is_safe(
        cut in 0usize..600,
        seq in any::<u64>(),
    ) {
        let prbs = PrbsCache::new(0, 0);
        let mut buf = vec![0u8; 600];
        build_frame(
            &mut buf,
            &FrameSpec { vlan: Some(105), vl_id: 1027 },
            seq,
            600,
            &prbs,
        );
        let truncated = &buf[..cut];
        if let Ok(parsed) = ParsedFrame::parse(truncated) {
            prop_assert!(parsed.payload_offset + parsed.payload_len <= truncated.len());
        }
    }
}
