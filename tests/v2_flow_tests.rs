//! ROHCv2 engine flows and control-CRC behavior.

mod common;

use common::{test_compressor, test_decompressor, udp_packet};
use rohcore::crc::CrcCalculators;
use rohcore::profiles::v2::packets::control_crc3;
use rohcore::{IpIdBehavior, Msn, OperMode, RohcProfile};

fn v2_pair() -> (rohcore::Compressor, rohcore::Decompressor) {
    let mut comp = test_compressor(8);
    comp.enable_profiles(&[
        RohcProfile::V2Udp,
        RohcProfile::V2Ip,
        RohcProfile::Uncompressed,
    ])
    .unwrap();
    let mut decomp = test_decompressor(8, OperMode::Optimistic);
    decomp
        .enable_profiles(&[
            RohcProfile::V2Udp,
            RohcProfile::V2Ip,
            RohcProfile::Uncompressed,
        ])
        .unwrap();
    (comp, decomp)
}

#[test]
fn v2_udp_flow_round_trips_and_acks() {
    let (mut comp, mut decomp) = v2_pair();
    let mut compressed = [0u8; 512];
    let mut restored = [0u8; 512];
    let mut acks = 0;

    for i in 0..60u16 {
        let packet = udp_packet(0x1000 + i, 24);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        assert_eq!(&restored[..rlen], &packet[..], "packet {i}");
        while let Some(feedback) = decomp.emit_feedback() {
            acks += 1;
            comp.deliver_feedback(&feedback).unwrap();
        }
    }
    assert!(acks > 0);
}

#[test]
fn v2_corrupted_packet_is_rejected_and_flow_recovers() {
    let (mut comp, mut decomp) = v2_pair();
    let mut compressed = [0u8; 512];
    let mut restored = [0u8; 512];

    for i in 0..40u16 {
        let packet = udp_packet(0x1000 + i, 24);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        decomp.decompress(&compressed[..clen], &mut restored).unwrap();
        while decomp.emit_feedback().is_some() {}
    }

    // Corrupt a run; collect the negative feedback.
    let mut feedback_seen = false;
    for i in 40..50u16 {
        let packet = udp_packet(0x1000 + i, 24);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        compressed[0] ^= 0x08;
        let _ = decomp.decompress(&compressed[..clen], &mut restored);
        while let Some(feedback) = decomp.emit_feedback() {
            feedback_seen = true;
            comp.deliver_feedback(&feedback).unwrap();
        }
    }
    assert!(feedback_seen, "corruption must surface as feedback");

    // The pair resynchronizes (co_repair or IR) and the stream continues.
    let mut resynced = false;
    for i in 50..70u16 {
        let packet = udp_packet(0x1000 + i, 24);
        let clen = comp.compress(&packet, &mut compressed).unwrap();
        if decomp
            .decompress(&compressed[..clen], &mut restored)
            .map(|rlen| &restored[..rlen] == &packet[..])
            .unwrap_or(false)
        {
            resynced = true;
        }
        while let Some(feedback) = decomp.emit_feedback() {
            comp.deliver_feedback(&feedback).unwrap();
        }
    }
    assert!(resynced, "flow must recover after corruption run");
}

#[test]
fn control_crc_matches_between_peers_and_flags_tampering() {
    // The concrete control-field vector: reorder_ratio 2, MSN 0x1234, one
    // IPv4 header with the byte-swapped sequential behavior.
    let crc = CrcCalculators::new();
    let sent = control_crc3(
        &crc,
        2,
        Msn::new(0x1234),
        &[IpIdBehavior::SequentialSwapped],
        0,
    );
    let received = control_crc3(
        &crc,
        2,
        Msn::new(0x1234),
        &[IpIdBehavior::SequentialSwapped],
        0,
    );
    assert_eq!(sent, received);
    assert!(sent <= 0x07);

    // Tamper with each covered input in turn: the CRC must differ.
    assert_ne!(
        sent,
        control_crc3(&crc, 3, Msn::new(0x1234), &[IpIdBehavior::SequentialSwapped], 0)
    );
    assert_ne!(
        sent,
        control_crc3(&crc, 2, Msn::new(0x1235), &[IpIdBehavior::SequentialSwapped], 0)
    );
    assert_ne!(
        sent,
        control_crc3(&crc, 2, Msn::new(0x1234), &[IpIdBehavior::Sequential], 0)
    );
}

#[test]
fn v2_ip_only_profile_compresses_icmp() {
    let (mut comp, mut decomp) = v2_pair();
    let mut compressed = [0u8; 512];
    let mut restored = [0u8; 512];

    // ICMP over IPv4 lands in the v2 IP-only profile when enabled.
    let mut packet = vec![0u8; 28];
    let ip = rohcore::headers::Ipv4Header {
        tos: 0,
        total_length: 28,
        identification: rohcore::IpId::new(400),
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl: 64,
        protocol: 1,
        checksum: 0,
        src: "10.5.5.1".parse().unwrap(),
        dst: "10.5.5.2".parse().unwrap(),
    };
    let at = ip.build(&mut packet).unwrap();
    for (i, byte) in packet[at..].iter_mut().enumerate() {
        *byte = i as u8;
    }

    let clen = comp.compress(&packet, &mut compressed).unwrap();
    assert_eq!(compressed[1], RohcProfile::V2Ip.lsb_octet());
    let rlen = decomp.decompress(&compressed[..clen], &mut restored).unwrap();
    assert_eq!(&restored[..rlen], &packet[..]);
}
