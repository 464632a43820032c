//! Feedback-driven behavior across a compressor/decompressor pair.

mod common;

use common::{rtp_stream, test_compressor, test_decompressor};
use rohcore::OperMode;

#[test]
fn o_mode_loop_acks_and_compressor_accepts_them() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Optimistic);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    let mut feedback_seen = 0;
    for packet in rtp_stream(50) {
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..]);
        while let Some(feedback) = decomp.emit_feedback() {
            feedback_seen += 1;
            comp.deliver_feedback(&feedback).unwrap();
        }
    }
    assert!(feedback_seen > 0, "O-mode must emit acknowledgements");
}

#[test]
fn u_mode_emits_no_feedback() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for packet in rtp_stream(30) {
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    }
    assert!(decomp.emit_feedback().is_none());
}

#[test]
fn nack_demotes_compressor_and_ir_dyn_follows() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Optimistic);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    let stream = rtp_stream(80);
    for packet in &stream[..40] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        while decomp.emit_feedback().is_some() {}
    }

    // Corrupt a run of packets; the decompressor NACKs the CRC failures.
    // Repair heuristics may swallow an individual corruption, so a run makes
    // the negative feedback certain.
    let mut nacks = Vec::new();
    for packet in &stream[40..50] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        compressed[clen - 1] ^= 0x06;
        let _ = decomp.decompress(&compressed[..clen], &mut restored);
        while let Some(feedback) = decomp.emit_feedback() {
            nacks.push(feedback);
        }
    }
    assert!(!nacks.is_empty(), "CRC failures must produce feedback");
    for nack in &nacks {
        comp.deliver_feedback(nack).unwrap();
    }

    // The compressor falls back and refreshes the context within a couple
    // of packets: an IR-DYN (or IR) must appear, after which the pair is
    // fully synchronized again.
    let mut refresh_seen = false;
    for packet in &stream[50..60] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        let core_start = if compressed[0] & 0xF0 == 0xE0 { 1 } else { 0 };
        if compressed[core_start] == 0xFC || compressed[core_start] == 0xFD {
            refresh_seen = true;
        }
        let _ = decomp.decompress(&compressed[..clen], &mut restored);
        while decomp.emit_feedback().is_some() {}
    }
    assert!(refresh_seen, "NACK must trigger a context refresh");

    for packet in &stream[60..] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..]);
        while decomp.emit_feedback().is_some() {}
    }
}

#[test]
fn delivering_the_same_feedback_twice_is_idempotent() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Optimistic);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    let stream = rtp_stream(40);
    for packet in &stream[..20] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    }
    let ack = decomp.emit_feedback().expect("feedback expected");
    comp.deliver_feedback(&ack).unwrap();
    comp.deliver_feedback(&ack).unwrap();

    // The stream continues undisturbed after the duplicate delivery.
    for packet in &stream[20..] {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..]);
        while decomp.emit_feedback().is_some() {}
    }
}

#[test]
fn feedback_for_unknown_cid_is_ignored() {
    let mut comp = test_compressor(4);
    // A FEEDBACK-1 for CID 9 with no context behind it.
    let feedback = rohcore::feedback::build_feedback1(
        rohcore::ContextId::new(9),
        0x42,
        rohcore::CidType::Small,
    );
    comp.deliver_feedback(&feedback).unwrap();
}

#[test]
fn garbage_feedback_is_rejected() {
    let mut comp = test_compressor(4);
    // Truncated wrapped element: header promises 4 bytes, delivers none.
    assert!(comp.deliver_feedback(&[0xF4]).is_err());
}
