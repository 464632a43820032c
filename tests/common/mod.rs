//! Shared packet builders and engine constructors for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use rohcore::headers::{EspHeader, Ipv4Header, RtpHeader, UdpHeader};
use rohcore::rand::FixedRandom;
use rohcore::time::SystemClock;
use rohcore::{CidType, Compressor, Decompressor, IpId, OperMode, SequenceNumber, Ssrc, Timestamp};

/// Compressor with a deterministic RNG so tests always land on CID 0 first.
pub fn test_compressor(max_contexts: usize) -> Compressor {
    Compressor::new(
        CidType::Small,
        max_contexts,
        Arc::new(FixedRandom::new(vec![0, 0], 0)),
        Arc::new(SystemClock),
    )
    .unwrap()
}

pub fn test_decompressor(max_contexts: usize, mode: OperMode) -> Decompressor {
    Decompressor::new(CidType::Small, max_contexts, mode).unwrap()
}

/// A 40-byte RTP/UDP/IPv4 header stack plus payload.
#[allow(clippy::too_many_arguments)]
pub fn rtp_packet(
    sn: u16,
    ts: u32,
    marker: bool,
    ip_id: u16,
    ssrc: u32,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total = 20 + 8 + 12 + payload.len();
    let ip = Ipv4Header {
        tos: 0,
        total_length: total as u16,
        identification: IpId::new(ip_id),
        dont_fragment: true,
        more_fragments: false,
        fragment_offset: 0,
        ttl: 64,
        protocol: 17,
        checksum: 0,
        src: "192.168.10.1".parse().unwrap(),
        dst: "192.168.10.2".parse().unwrap(),
    };
    let udp = UdpHeader {
        src_port,
        dst_port,
        length_or_coverage: (8 + 12 + payload.len()) as u16,
        checksum: 0,
    };
    let rtp = RtpHeader {
        padding: false,
        extension: false,
        marker,
        payload_type: 0,
        sequence_number: SequenceNumber::new(sn),
        timestamp: Timestamp::new(ts),
        ssrc: Ssrc::new(ssrc),
        csrc: vec![],
    };
    let mut out = vec![0u8; total];
    let mut at = ip.build(&mut out).unwrap();
    at += udp.build(&mut out[at..]).unwrap();
    at += rtp.build(&mut out[at..]).unwrap();
    out[at..].copy_from_slice(payload);
    out
}

/// A stationary voice-like stream: SN 1..=n, TS stride 160, SSRC 0xDEADBEEF,
/// ports 5004/5004, zero IP-ID.
pub fn rtp_stream(n: u16) -> Vec<Vec<u8>> {
    (1..=n)
        .map(|sn| rtp_packet(sn, sn as u32 * 160, false, 0, 0xDEADBEEF, 5004, 5004, b""))
        .collect()
}

/// An IPv4/UDP packet (non-RTP payload, too short to parse as RTP).
pub fn udp_packet(ip_id: u16, payload_len: usize) -> Vec<u8> {
    let payload = vec![0x55u8; payload_len];
    let total = 20 + 8 + payload.len();
    let ip = Ipv4Header {
        tos: 0,
        total_length: total as u16,
        identification: IpId::new(ip_id),
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl: 63,
        protocol: 17,
        checksum: 0,
        src: "10.20.30.1".parse().unwrap(),
        dst: "10.20.30.2".parse().unwrap(),
    };
    let udp = UdpHeader {
        src_port: 9000,
        dst_port: 9001,
        length_or_coverage: (8 + payload.len()) as u16,
        checksum: 0,
    };
    let mut out = vec![0u8; total];
    let mut at = ip.build(&mut out).unwrap();
    at += udp.build(&mut out[at..]).unwrap();
    out[at..].copy_from_slice(&payload);
    out
}

/// An SCTP-over-IPv4 packet: no profile but Uncompressed accepts it.
pub fn sctp_packet(payload_len: usize) -> Vec<u8> {
    let payload = vec![0xA5u8; payload_len];
    let total = 20 + payload.len();
    let ip = Ipv4Header {
        tos: 0,
        total_length: total as u16,
        identification: IpId::new(77),
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl: 64,
        protocol: 132,
        checksum: 0,
        src: "172.30.0.1".parse().unwrap(),
        dst: "172.30.0.2".parse().unwrap(),
    };
    let mut out = vec![0u8; total];
    let at = ip.build(&mut out).unwrap();
    out[at..].copy_from_slice(&payload);
    out
}

/// An ESP-over-IPv4 packet.
pub fn esp_packet(sn: u32, payload_len: usize) -> Vec<u8> {
    let payload = vec![0xE5u8; payload_len];
    let total = 20 + 8 + payload.len();
    let ip = Ipv4Header {
        tos: 0,
        total_length: total as u16,
        identification: IpId::new(0),
        dont_fragment: true,
        more_fragments: false,
        fragment_offset: 0,
        ttl: 64,
        protocol: 50,
        checksum: 0,
        src: "10.40.0.1".parse().unwrap(),
        dst: "10.40.0.2".parse().unwrap(),
    };
    let esp = EspHeader {
        spi: 0x1001_2002,
        sequence_number: sn,
    };
    let mut out = vec![0u8; total];
    let mut at = ip.build(&mut out).unwrap();
    at += esp.build(&mut out[at..]).unwrap();
    out[at..].copy_from_slice(&payload);
    out
}
