//! End-to-end flows through the engine pair for the RTP profile.

mod common;

use common::{rtp_packet, rtp_stream, test_compressor, test_decompressor};
use rohcore::{OperMode, RohcError, RohcStatus};

#[test]
fn rtp_stream_round_trips_byte_for_byte() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for (i, packet) in rtp_stream(100).iter().enumerate() {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {}", i + 1);
    }
}

#[test]
fn rtp_convergence_envelope() {
    let mut comp = test_compressor(4);
    let mut sizes = Vec::new();
    let mut compressed = [0u8; 256];
    for packet in rtp_stream(100) {
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        sizes.push(clen);
    }

    // First packet carries the full chains.
    assert!(sizes[0] > 25, "IR expected, got {} bytes", sizes[0]);
    // The converged tail is dominated by one-byte UO-0 packets.
    let tail = &sizes[30..];
    let small = tail.iter().filter(|&&s| s <= 2).count();
    assert!(
        small * 10 >= tail.len() * 9,
        "{}/{} tail packets small, sizes: {:?}",
        small,
        tail.len(),
        sizes
    );
}

#[test]
fn payload_travels_untouched() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 512];
    let mut restored = [0u8; 512];

    for sn in 1..=30u16 {
        let payload: Vec<u8> = (0..160u32).map(|b| (b as u8).wrapping_mul(sn as u8)).collect();
        let packet = rtp_packet(
            sn,
            sn as u32 * 160,
            false,
            0,
            0xDEADBEEF,
            5004,
            5004,
            &payload,
        );
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..]);
    }
}

#[test]
fn single_loss_after_convergence_recovers_without_ir() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    let stream = rtp_stream(60);
    for (i, packet) in stream.iter().enumerate() {
        let clen = comp.compress(packet, &mut compressed).unwrap();
        // Drop packet 50 on the wire.
        if i + 1 == 50 {
            continue;
        }
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {}", i + 1);
    }
}

#[test]
fn burst_loss_within_interpretation_interval_recovers() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    // Constant TS stream keeps the packets UO-0 after convergence.
    let build = |sn: u16| rtp_packet(sn, 7000, false, 0, 0xDEADBEEF, 5004, 5004, b"");
    for sn in 1..=40u16 {
        let clen = comp.compress(&build(sn), &mut compressed).unwrap();
        decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    }
    // Drop a burst of 6 packets (less than 2^(k-1) for the 4-bit SN space
    // is not guaranteed, but the windowed encoder widens k accordingly).
    for sn in 41..=46u16 {
        let _ = comp.compress(&build(sn), &mut compressed).unwrap();
    }
    let packet = build(47);
    let clen = comp.compress(&packet, &mut compressed).unwrap();
    let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    assert_eq!(&restored[..rlen], &packet[..]);
}

#[test]
fn marker_flip_round_trips() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for sn in 1..=35u16 {
        let marker = sn == 33;
        let packet = rtp_packet(sn, 9000, marker, 0, 0xDEADBEEF, 5004, 5004, b"");
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {sn}");
    }
}

#[test]
fn two_flows_get_distinct_cids() {
    let mut comp = test_compressor(8);
    let mut decomp = test_decompressor(8, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for sn in 1..=10u16 {
        let a = rtp_packet(sn, sn as u32 * 160, false, 0, 0x1111_1111, 5004, 5004, b"a");
        let b = rtp_packet(sn, sn as u32 * 80, false, 0, 0x2222_2222, 6004, 6004, b"b");
        for packet in [&a, &b] {
            let clen = comp.compress(packet, &mut compressed).unwrap();
            let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
            assert_eq!(&restored[..rlen], &packet[..]);
        }
    }
    assert_eq!(comp.context_count(), 2);
    assert_eq!(decomp.context_count(), 2);
}

#[test]
fn decompressor_rejects_uo_before_ir() {
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut restored = [0u8; 256];
    // A UO-0 byte on a CID that has no context.
    let err = decomp.decompress(&[0x09], &mut restored).unwrap_err();
    assert_eq!(err.status(), RohcStatus::NoContext);
    assert!(matches!(err, RohcError::Decompression(_)));
}
