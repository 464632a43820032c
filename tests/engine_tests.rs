//! Engine-level behavior: profile classification, fallback, CID framing and
//! context table limits.

mod common;

use std::sync::Arc;

use common::{esp_packet, rtp_packet, sctp_packet, test_compressor, test_decompressor, udp_packet};
use rohcore::rand::FixedRandom;
use rohcore::time::SystemClock;
use rohcore::{CidType, Compressor, Decompressor, OperMode, RohcProfile};

#[test]
fn sctp_falls_through_to_uncompressed() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let packet = sctp_packet(64);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    // First packet: IR of the Uncompressed profile.
    let clen = comp.compress(&packet, &mut compressed).unwrap();
    assert_eq!(compressed[0], 0xFD);
    assert_eq!(compressed[1], RohcProfile::Uncompressed.lsb_octet());
    let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    assert_eq!(&restored[..rlen], &packet[..]);

    // Steady state: passthrough with small constant overhead.
    let clen = comp.compress(&packet, &mut compressed).unwrap();
    assert!(clen <= packet.len() + 2, "overhead too large: {clen}");
    let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    assert_eq!(&restored[..rlen], &packet[..]);
}

#[test]
fn udp_and_esp_route_to_their_profiles() {
    let mut comp = test_compressor(8);
    let mut compressed = [0u8; 256];

    let clen = comp.compress(&udp_packet(100, 32), &mut compressed).unwrap();
    assert!(clen > 3);
    assert_eq!(compressed[0], 0xFD);
    assert_eq!(compressed[1], RohcProfile::Udp.lsb_octet());

    let _ = comp.compress(&esp_packet(1, 32), &mut compressed).unwrap();
    assert_eq!(compressed[0] & 0xF0, 0xE0, "second flow carries an Add-CID");
    assert_eq!(compressed[1], 0xFD);
    assert_eq!(compressed[2], RohcProfile::Esp.lsb_octet());
}

#[test]
fn esp_flow_round_trips() {
    let mut comp = test_compressor(4);
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for sn in 1..=40u32 {
        let packet = esp_packet(0x0100_0000 + sn, 24);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "ESP packet {sn}");
    }
}

#[test]
fn full_context_table_evicts_lru_and_call_succeeds() {
    let mut comp = test_compressor(2);
    let mut compressed = [0u8; 256];

    // Three distinct flows into a table of two.
    for ssrc in [0x0101_0101u32, 0x0202_0202, 0x0303_0303] {
        let packet = rtp_packet(1, 160, false, 0, ssrc, 5004, 5004, b"");
        comp.compress(&packet, &mut compressed).unwrap();
    }
    assert_eq!(comp.context_count(), 2);

    // The evicted first flow comes back through a fresh IR.
    let packet = rtp_packet(2, 320, false, 0, 0x0101_0101, 5004, 5004, b"");
    let clen = comp.compress(&packet, &mut compressed).unwrap();
    let core_start = if compressed[0] & 0xF0 == 0xE0 { 1 } else { 0 };
    assert_eq!(compressed[core_start], 0xFD, "re-created flow starts at IR");
    assert!(clen > 3);
}

#[test]
fn large_cid_framing_round_trips() {
    let mut comp = Compressor::new(
        CidType::Large,
        1024,
        Arc::new(FixedRandom::new(vec![300, 0], 0)),
        Arc::new(SystemClock),
    )
    .unwrap();
    let mut decomp = Decompressor::new(CidType::Large, 1024, OperMode::Unidirectional).unwrap();
    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];

    for sn in 1..=30u16 {
        let packet = rtp_packet(sn, sn as u32 * 160, false, 0, 0xABCD_EF01, 5004, 5004, b"x");
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {sn}");
    }
    assert_eq!(decomp.context_count(), 1);
}

#[test]
fn disabled_profile_is_skipped_in_classification() {
    let mut comp = test_compressor(4);
    comp.enable_profiles(&[RohcProfile::Udp, RohcProfile::Uncompressed])
        .unwrap();
    let mut compressed = [0u8; 256];

    // RTP-shaped traffic lands in the UDP profile with RTP disabled.
    let packet = rtp_packet(1, 160, false, 0, 0xDEADBEEF, 5004, 5004, b"");
    comp.compress(&packet, &mut compressed).unwrap();
    assert_eq!(compressed[0], 0xFD);
    assert_eq!(compressed[1], RohcProfile::Udp.lsb_octet());
}

#[test]
fn compressor_without_uncompressed_profile_rejects_alien_packets() {
    let mut comp = test_compressor(4);
    comp.enable_profiles(&[RohcProfile::Rtp]).unwrap();
    let mut compressed = [0u8; 256];
    assert!(comp.compress(&sctp_packet(16), &mut compressed).is_err());
}

#[test]
fn v2_profiles_require_explicit_opt_in() {
    let mut comp = test_compressor(4);
    comp.enable_profiles(&[
        RohcProfile::V2Udp,
        RohcProfile::V2Ip,
        RohcProfile::Uncompressed,
    ])
    .unwrap();
    let mut decomp = test_decompressor(4, OperMode::Unidirectional);
    decomp
        .enable_profiles(&[
            RohcProfile::V2Udp,
            RohcProfile::V2Ip,
            RohcProfile::Uncompressed,
        ])
        .unwrap();

    let mut compressed = [0u8; 256];
    let mut restored = [0u8; 256];
    for i in 0..30u16 {
        let packet = udp_packet(0x4000 + i, 16);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        if i == 0 {
            assert_eq!(compressed[1], RohcProfile::V2Udp.lsb_octet());
        }
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {i}");
    }
}
