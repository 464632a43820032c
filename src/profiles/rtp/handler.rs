//! `ProfileHandler` implementation for the RTP/UDP/IP profile.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use crate::constants::{IPV4_MIN_HEADER_LENGTH, UDP_HEADER_LENGTH};
use crate::crc::CrcCalculators;
use crate::error::RohcError;
use crate::feedback::{AckType, FeedbackUnit};
use crate::headers::Ipv4Header;
use crate::packet_defs::{Features, RohcProfile};
use crate::traits::{
    ClassifyEnv, CompressorProfileConfig, ProfileHandler, RohcCompressorContext,
    RohcDecompressorContext,
};
use crate::types::{ContextId, Msn};

use super::compression;
use super::context::{RtpCompressorContext, RtpDecompressorContext, RtpPacketView};
use super::decompression;

/// Handler for profile 0x0001.
#[derive(Debug, Default)]
pub struct RtpHandler {
    crc: CrcCalculators,
}

impl RtpHandler {
    /// Creates the handler.
    pub fn new() -> Self {
        Self {
            crc: CrcCalculators::new(),
        }
    }

    /// Structural and transparency checks shared by `matches`.
    fn compressible_view(packet: &[u8], features: Features) -> Option<RtpPacketView> {
        let view = RtpPacketView::parse(packet).ok()?;
        // Fragmented packets and CSRC lists are not expressible in the
        // compressed formats; IP options were already rejected by the parser.
        if view.ip.more_fragments || view.ip.fragment_offset != 0 {
            return None;
        }
        if !view.rtp.csrc.is_empty() || view.rtp.padding {
            return None;
        }
        // Rebuild must be byte-exact: lengths and checksum have to be the
        // inferred values.
        if view.ip.total_length as usize != packet.len() {
            return None;
        }
        if view.udp.length_or_coverage as usize != packet.len() - IPV4_MIN_HEADER_LENGTH {
            return None;
        }
        if !features.contains(Features::NO_IP_CHECKSUMS)
            && view.ip.checksum != view.ip.expected_checksum()
        {
            return None;
        }
        Some(view)
    }
}

impl ProfileHandler for RtpHandler {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Rtp
    }

    fn matches(&self, packet: &[u8], env: &ClassifyEnv<'_>) -> bool {
        let Some(view) = Self::compressible_view(packet, env.features) else {
            return false;
        };
        match env.rtp_detector {
            Some(detector) => {
                let payload = &packet[IPV4_MIN_HEADER_LENGTH + UDP_HEADER_LENGTH..];
                detector(payload, view.udp.src_port, view.udp.dst_port)
            }
            // Structural detection: the payload parsed as RTP version 2.
            None => true,
        }
    }

    fn flow_signature(&self, packet: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        if let Ok(view) = RtpPacketView::parse(packet) {
            view.ip.src.hash(&mut hasher);
            view.ip.dst.hash(&mut hasher);
            view.udp.src_port.hash(&mut hasher);
            view.udp.dst_port.hash(&mut hasher);
            view.rtp.ssrc.value().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorProfileConfig,
    ) -> Box<dyn RohcCompressorContext> {
        Box::new(RtpCompressorContext::new(cid, config))
    }

    fn create_decompressor_context(
        &self,
        cid: ContextId,
        _features: Features,
    ) -> Box<dyn RohcDecompressorContext> {
        Box::new(RtpDecompressorContext::new(cid))
    }

    fn compress(
        &self,
        context: &mut dyn RohcCompressorContext,
        packet: &[u8],
        now: Instant,
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<RtpCompressorContext>()
            .expect("context type bound to handler");
        let view = RtpPacketView::parse(packet)?;
        let payload = &packet[view.header_len..];
        compression::compress(ctx, &view, payload, now, &self.crc, out)
    }

    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<RtpDecompressorContext>()
            .expect("context type bound to handler");
        decompression::decompress(ctx, core_packet, &self.crc, out)
    }

    fn handle_feedback(&self, context: &mut dyn RohcCompressorContext, feedback: &FeedbackUnit) {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<RtpCompressorContext>()
            .expect("context type bound to handler");
        if let Some(mode) = feedback.mode {
            ctx.mode = mode;
        }
        match feedback.ack_type {
            AckType::Ack => {
                ctx.sm.on_ack();
                if let Some(msn) = feedback.usable_msn() {
                    let acked = Msn::new(msn);
                    ctx.sn_window.ack_to(acked);
                    ctx.ts_window.ack_to(acked);
                    ctx.ip_id_window.ack_to(acked);
                }
            }
            AckType::Nack => {
                ctx.sm.on_nack();
                ctx.ir_dyn_pending = true;
            }
            AckType::StaticNack => ctx.sm.on_static_nack(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{RtpHeader, UdpHeader};
    use crate::packet_defs::OperMode;
    use crate::types::{SequenceNumber, Ssrc, Timestamp};

    fn build_packet(sn: u16, ts: u32, payload: &[u8]) -> Vec<u8> {
        let rtp = RtpHeader {
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: SequenceNumber::new(sn),
            timestamp: Timestamp::new(ts),
            ssrc: Ssrc::new(0xDEADBEEF),
            csrc: vec![],
        };
        let total = 20 + 8 + 12 + payload.len();
        let ip = Ipv4Header {
            tos: 0,
            total_length: total as u16,
            identification: crate::types::IpId::new(0),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: 17,
            checksum: 0,
            src: "192.168.0.1".parse().unwrap(),
            dst: "192.168.0.2".parse().unwrap(),
        };
        let udp = UdpHeader {
            src_port: 5004,
            dst_port: 5004,
            length_or_coverage: (8 + 12 + payload.len()) as u16,
            checksum: 0,
        };
        let mut out = vec![0u8; total];
        let mut at = ip.build(&mut out).unwrap();
        at += udp.build(&mut out[at..]).unwrap();
        at += rtp.build(&mut out[at..]).unwrap();
        out[at..].copy_from_slice(payload);
        out
    }

    fn env() -> ClassifyEnv<'static> {
        ClassifyEnv {
            rtp_detector: None,
            features: Features::NONE,
        }
    }

    #[test]
    fn matches_well_formed_rtp_packet() {
        let handler = RtpHandler::new();
        let packet = build_packet(1, 160, b"voice");
        assert!(handler.matches(&packet, &env()));
    }

    #[test]
    fn rejects_non_udp_and_truncated_packets() {
        let handler = RtpHandler::new();
        let mut packet = build_packet(1, 160, b"voice");
        packet[9] = 6; // TCP
        assert!(!handler.matches(&packet, &env()));
        assert!(!handler.matches(&[0x45, 0x00], &env()));
    }

    #[test]
    fn detector_callback_overrides_structural_detection() {
        let handler = RtpHandler::new();
        let packet = build_packet(1, 160, b"voice");
        let reject_all: Box<crate::traits::RtpDetector> = Box::new(|_, _, _| false);
        let env = ClassifyEnv {
            rtp_detector: Some(reject_all.as_ref()),
            features: Features::NONE,
        };
        assert!(!handler.matches(&packet, &env));
    }

    #[test]
    fn flow_signature_distinguishes_ssrc() {
        let handler = RtpHandler::new();
        let a = build_packet(1, 0, b"");
        let mut b = build_packet(1, 0, b"");
        // Flip a bit inside the SSRC field.
        b[20 + 8 + 8] ^= 0x01;
        assert_ne!(handler.flow_signature(&a), handler.flow_signature(&b));
    }

    #[test]
    fn compress_decompress_round_trip_via_handler() {
        let handler = RtpHandler::new();
        let config = CompressorProfileConfig {
            ir_refresh_interval: 0,
            wlsb_width: 4,
            features: Features::NONE,
            msn_seed: 0,
            mode: OperMode::Unidirectional,
        };
        let mut comp_ctx = handler.create_compressor_context(ContextId::new(0), &config);
        let mut decomp_ctx = handler.create_decompressor_context(ContextId::new(0), Features::NONE);

        let mut compressed = [0u8; 256];
        let mut restored = [0u8; 256];
        for sn in 1..=40u16 {
            let packet = build_packet(sn, 1000 + sn as u32 * 160, b"abcd");
            let clen = handler
                .compress(comp_ctx.as_mut(), &packet, Instant::now(), &mut compressed)
                .unwrap();
            let rlen = handler
                .decompress(decomp_ctx.as_mut(), &compressed[..clen], &mut restored)
                .unwrap();
            assert_eq!(&restored[..rlen], &packet[..], "packet {sn} mismatched");
        }
    }
}
