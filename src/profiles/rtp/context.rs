//! Compressor and decompressor contexts for the RTP/UDP/IP profile.

use std::any::Any;
use std::net::Ipv4Addr;

use crate::encodings::WlsbWindow;
use crate::error::{NetworkLayer, RohcParsingError};
use crate::headers::{Ipv4Header, RtpHeader, UdpHeader};
use crate::constants::{IP_PROTOCOL_UDP, IPV4_MIN_HEADER_LENGTH, UDP_HEADER_LENGTH};
use crate::packet_defs::{DecompState, Features, IpIdBehavior, OperMode, RohcProfile};
use crate::state_machine::{CompressorStateMachine, DecompressorStateMachine};
use crate::traits::{CompressorProfileConfig, RohcCompressorContext, RohcDecompressorContext};
use crate::types::{ContextId, IpId, Msn, SequenceNumber, Ssrc, Timestamp};

use super::constants::INIT_TS_STRIDE_MIN;

/// A parsed RTP/UDP/IPv4 packet: the three headers plus the offset where the
/// payload begins.
#[derive(Debug, Clone)]
pub struct RtpPacketView {
    pub ip: Ipv4Header,
    pub udp: UdpHeader,
    pub rtp: RtpHeader,
    pub header_len: usize,
}

impl RtpPacketView {
    /// Parses the full header stack from an uncompressed packet.
    pub fn parse(packet: &[u8]) -> Result<RtpPacketView, RohcParsingError> {
        let ip = Ipv4Header::parse(packet)?;
        if ip.protocol != IP_PROTOCOL_UDP {
            return Err(RohcParsingError::UnsupportedProtocol {
                protocol_id: ip.protocol,
                layer: NetworkLayer::Ip,
            });
        }
        let udp = UdpHeader::parse(&packet[IPV4_MIN_HEADER_LENGTH..])?;
        let rtp = RtpHeader::parse(&packet[IPV4_MIN_HEADER_LENGTH + UDP_HEADER_LENGTH..])?;
        let header_len = IPV4_MIN_HEADER_LENGTH + UDP_HEADER_LENGTH + rtp.wire_length();
        Ok(RtpPacketView {
            ip,
            udp,
            rtp,
            header_len,
        })
    }
}

/// Timestamp-scaling phases (RFC 3095, Section 4.5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsPhase {
    /// No stride known; timestamps travel unscaled.
    #[default]
    InitTs,
    /// A stride is proposed and being transmitted to the peer.
    InitStride,
    /// Scaled timestamps are flowing.
    SendScaled,
}

/// Compressor-side per-flow state.
#[derive(Debug)]
pub struct RtpCompressorContext {
    pub cid: ContextId,
    pub mode: OperMode,
    pub features: Features,

    // Static chain.
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub udp_src_port: u16,
    pub udp_dst_port: u16,
    pub ssrc: Ssrc,

    // Quasi-static fields, changed only through IR / IR-DYN.
    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub rtp_padding: bool,
    pub rtp_extension: bool,
    pub rtp_payload_type: u8,

    // State machine.
    pub sm: CompressorStateMachine,

    // Dynamic fields of the last sent packet.
    pub last_sn: SequenceNumber,
    pub last_ts: Timestamp,
    pub last_marker: bool,
    pub last_ip_id: IpId,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,

    // W-LSB reference windows. The TS window tracks scaled values while
    // scaled timestamps flow, raw values otherwise.
    pub sn_window: WlsbWindow,
    pub ts_window: WlsbWindow,
    pub ip_id_window: WlsbWindow,

    // TS_STRIDE subsystem.
    pub ts_phase: TsPhase,
    pub ts_stride: Option<u32>,
    pub stride_confirmations: u32,
    pub stride_transmissions: u32,

    /// A negative acknowledgement asked for a dynamic-chain refresh.
    pub ir_dyn_pending: bool,

    /// Set once the first packet initialized the context.
    pub initialized: bool,
}

impl RtpCompressorContext {
    pub fn new(cid: ContextId, config: &CompressorProfileConfig) -> Self {
        Self {
            cid,
            mode: config.mode,
            features: config.features,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            udp_src_port: 0,
            udp_dst_port: 0,
            ssrc: Ssrc::new(0),
            tos: 0,
            ttl: 0,
            df: false,
            udp_checksum_present: false,
            rtp_padding: false,
            rtp_extension: false,
            rtp_payload_type: 0,
            sm: CompressorStateMachine::new(config.ir_refresh_interval),
            last_sn: SequenceNumber::new(0),
            last_ts: Timestamp::new(0),
            last_marker: false,
            last_ip_id: IpId::new(0),
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            sn_window: WlsbWindow::new(config.wlsb_width),
            ts_window: WlsbWindow::new(config.wlsb_width),
            ip_id_window: WlsbWindow::new(config.wlsb_width),
            ts_phase: TsPhase::InitTs,
            ts_stride: None,
            stride_confirmations: 0,
            stride_transmissions: 0,
            ir_dyn_pending: false,
            initialized: false,
        }
    }

    /// Seeds every field from the first packet of the flow.
    pub fn initialize_from(&mut self, view: &RtpPacketView) {
        self.ip_src = view.ip.src;
        self.ip_dst = view.ip.dst;
        self.udp_src_port = view.udp.src_port;
        self.udp_dst_port = view.udp.dst_port;
        self.ssrc = view.rtp.ssrc;
        self.tos = view.ip.tos;
        self.ttl = view.ip.ttl;
        self.df = view.ip.dont_fragment;
        self.udp_checksum_present = view.udp.checksum != 0;
        self.rtp_padding = view.rtp.padding;
        self.rtp_extension = view.rtp.extension;
        self.rtp_payload_type = view.rtp.payload_type;

        self.last_sn = view.rtp.sequence_number;
        self.last_ts = view.rtp.timestamp;
        self.last_marker = view.rtp.marker;
        self.last_ip_id = view.ip.identification;
        self.ip_id_behavior = if view.ip.identification == 0 {
            IpIdBehavior::Zero
        } else {
            IpIdBehavior::Sequential
        };
        self.last_ip_id_offset = self.ip_id_offset_of(view.ip.identification, view.rtp.sequence_number);

        self.sn_window.clear();
        self.ts_window.clear();
        self.ip_id_window.clear();
        self.ts_phase = TsPhase::InitTs;
        self.ts_stride = None;
        self.stride_confirmations = 0;
        self.stride_transmissions = 0;
        self.ir_dyn_pending = false;
        self.initialized = true;
    }

    /// MSN of this profile is the RTP sequence number.
    #[inline]
    pub fn msn(&self) -> Msn {
        Msn::new(self.last_sn.value())
    }

    /// IP-ID offset under the current behavior: the distance between the
    /// (possibly byte-swapped) IP-ID and the sequence number.
    pub fn ip_id_offset_of(&self, ip_id: IpId, sn: SequenceNumber) -> u16 {
        let effective = match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => ip_id.swapped().value(),
            _ => ip_id.value(),
        };
        effective.wrapping_sub(sn.value())
    }

    /// Re-evaluates the IP-ID behavior against a new observation. Returns
    /// true when the behavior diverged and the context must resynchronize.
    pub fn reclassify_ip_id(&mut self, ip_id: IpId, sn: SequenceNumber) -> bool {
        let msn_delta = sn.wrapping_sub(self.last_sn);
        let observed =
            IpIdBehavior::classify(self.last_ip_id.value(), ip_id.value(), msn_delta);
        let diverged = match (self.ip_id_behavior, observed) {
            // Zero stays zero only while the field is zero.
            (IpIdBehavior::Zero, IpIdBehavior::Zero) => false,
            (current, seen) if current == seen => false,
            // A sequential flow whose offset jumps still parses as
            // sequential; only a class change forces resync.
            _ => true,
        };
        if diverged {
            self.ip_id_behavior = observed;
        }
        diverged
    }

    /// Advances TS_STRIDE tracking with the timestamp of the packet being
    /// compressed. Called before the context commits the packet.
    pub fn track_ts_stride(&mut self, ts: Timestamp) {
        if !self.initialized {
            return;
        }
        let delta = ts.wrapping_diff(self.last_ts);
        if delta == 0 {
            // Constant timestamps: a zero stride must never be proposed.
            return;
        }
        match self.ts_phase {
            TsPhase::InitTs => {
                self.ts_stride = Some(delta);
                self.stride_confirmations = 1;
                self.stride_transmissions = 0;
                self.ts_phase = TsPhase::InitStride;
            }
            TsPhase::InitStride | TsPhase::SendScaled => {
                let stride = self.ts_stride.expect("stride set when past InitTs");
                if delta % stride == 0 {
                    self.stride_confirmations = self.stride_confirmations.saturating_add(1);
                } else {
                    // Stride broken; start over proposing the new delta.
                    self.ts_stride = Some(delta);
                    self.stride_confirmations = 1;
                    self.stride_transmissions = 0;
                    self.ts_phase = TsPhase::InitStride;
                    self.ts_window.clear();
                }
            }
        }
    }

    /// Accounts one stride transmission (IR or IR-DYN carrying TS_STRIDE)
    /// and advances to SEND_SCALED once enough went out.
    pub fn note_stride_transmitted(&mut self) {
        if self.ts_phase != TsPhase::InitStride {
            return;
        }
        self.stride_transmissions += 1;
        if self.stride_transmissions >= INIT_TS_STRIDE_MIN {
            self.ts_phase = TsPhase::SendScaled;
            // The TS window switches to the scaled value space.
            self.ts_window.clear();
        }
    }

    /// Scaled timestamp for `ts`: plain division by the stride. Both sides
    /// derive the same value from their own timestamps, so the scaled space
    /// survives lost stride announcements. The residue `ts % stride` is the
    /// invariant part; a residue change breaks the stride and is caught by
    /// `track_ts_stride`.
    pub fn ts_scaled_of(&self, ts: Timestamp) -> Option<u32> {
        if self.ts_phase != TsPhase::SendScaled {
            return None;
        }
        let stride = self.ts_stride?;
        Some(ts.value() / stride)
    }

    /// The value the TS window tracks for `ts`: scaled in SEND_SCALED, raw
    /// otherwise. `None` means scaled mode lost alignment.
    pub fn ts_window_value(&self, ts: Timestamp) -> Option<u64> {
        match self.ts_phase {
            TsPhase::SendScaled => self.ts_scaled_of(ts).map(u64::from),
            _ => Some(ts.as_u64()),
        }
    }
}

impl RohcCompressorContext for RtpCompressorContext {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Rtp
    }
    fn cid(&self) -> ContextId {
        self.cid
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decompressor-side per-flow state.
#[derive(Debug)]
pub struct RtpDecompressorContext {
    pub cid: ContextId,

    // Static chain.
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub udp_src_port: u16,
    pub udp_dst_port: u16,
    pub ssrc: Ssrc,

    // Quasi-static fields.
    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub rtp_padding: bool,
    pub rtp_extension: bool,
    pub rtp_payload_type: u8,

    // State machine.
    pub sm: DecompressorStateMachine,

    // References: last accepted (REF_0) and the one before (REF_MINUS_1).
    pub last_sn: SequenceNumber,
    pub prev_sn: Option<SequenceNumber>,
    pub last_ts: Timestamp,
    pub prev_ts: Option<Timestamp>,
    pub last_marker: bool,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,
    pub prev_ip_id_offset: Option<u16>,

    // TS scaling, learned from IR / IR-DYN.
    pub ts_stride: Option<u32>,
    pub ts_scaled_mode: bool,
}

impl RtpDecompressorContext {
    pub fn new(cid: ContextId) -> Self {
        Self {
            cid,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            udp_src_port: 0,
            udp_dst_port: 0,
            ssrc: Ssrc::new(0),
            tos: 0,
            ttl: 64,
            df: false,
            udp_checksum_present: false,
            rtp_padding: false,
            rtp_extension: false,
            rtp_payload_type: 0,
            sm: DecompressorStateMachine::new(),
            last_sn: SequenceNumber::new(0),
            prev_sn: None,
            last_ts: Timestamp::new(0),
            prev_ts: None,
            last_marker: false,
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            prev_ip_id_offset: None,
            ts_stride: None,
            ts_scaled_mode: false,
        }
    }

    /// Commits a successfully decoded packet's dynamic fields, rotating the
    /// reference pair.
    pub fn commit(
        &mut self,
        sn: SequenceNumber,
        ts: Timestamp,
        marker: bool,
        ip_id_offset: u16,
    ) {
        self.prev_sn = Some(self.last_sn);
        self.prev_ts = Some(self.last_ts);
        self.prev_ip_id_offset = Some(self.last_ip_id_offset);
        self.last_sn = sn;
        self.last_ts = ts;
        self.last_marker = marker;
        self.last_ip_id_offset = ip_id_offset;
    }

    /// Scaled value of the last accepted timestamp.
    pub fn scaled_reference(&self) -> Option<u32> {
        let stride = self.ts_stride?;
        Some(self.last_ts.value() / stride)
    }

    /// Residue of the timestamp below the stride, invariant in scaled mode.
    pub fn ts_residue(&self) -> u32 {
        match self.ts_stride {
            Some(stride) => self.last_ts.value() % stride,
            None => 0,
        }
    }

    /// Rebuilds the IP-ID from a decoded offset and sequence number.
    pub fn ip_id_from_offset(&self, offset: u16, sn: SequenceNumber) -> IpId {
        let value = offset.wrapping_add(sn.value());
        match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => IpId::new(value.swap_bytes()),
            _ => IpId::new(value),
        }
    }
}

impl RohcDecompressorContext for RtpDecompressorContext {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Rtp
    }
    fn cid(&self) -> ContextId {
        self.cid
    }
    fn set_cid(&mut self, cid: ContextId) {
        self.cid = cid;
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn state(&self) -> DecompState {
        self.sm.state()
    }
    fn ack_msn(&self) -> Option<Msn> {
        match self.sm.state() {
            DecompState::NoContext => None,
            _ => Some(Msn::new(self.last_sn.value())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_defs::Features;

    fn config() -> CompressorProfileConfig {
        CompressorProfileConfig {
            ir_refresh_interval: 0,
            wlsb_width: 4,
            features: Features::NONE,
            msn_seed: 0,
            mode: OperMode::Unidirectional,
        }
    }

    fn view(sn: u16, ts: u32, ip_id: u16) -> RtpPacketView {
        RtpPacketView {
            ip: Ipv4Header {
                tos: 0,
                total_length: 40,
                identification: IpId::new(ip_id),
                dont_fragment: true,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: IP_PROTOCOL_UDP,
                checksum: 0,
                src: "10.0.0.1".parse().unwrap(),
                dst: "10.0.0.2".parse().unwrap(),
            },
            udp: UdpHeader {
                src_port: 5004,
                dst_port: 5004,
                length_or_coverage: 20,
                checksum: 0,
            },
            rtp: RtpHeader {
                padding: false,
                extension: false,
                marker: false,
                payload_type: 0,
                sequence_number: SequenceNumber::new(sn),
                timestamp: Timestamp::new(ts),
                ssrc: Ssrc::new(0xDEADBEEF),
                csrc: vec![],
            },
            header_len: 40,
        }
    }

    #[test]
    fn stride_detection_reaches_send_scaled() {
        let mut ctx = RtpCompressorContext::new(ContextId::new(0), &config());
        ctx.initialize_from(&view(1, 1000, 1));

        ctx.track_ts_stride(Timestamp::new(1160));
        assert_eq!(ctx.ts_phase, TsPhase::InitStride);
        assert_eq!(ctx.ts_stride, Some(160));

        for _ in 0..INIT_TS_STRIDE_MIN {
            ctx.note_stride_transmitted();
        }
        assert_eq!(ctx.ts_phase, TsPhase::SendScaled);
        // Scaled space is plain division by the stride.
        assert_eq!(ctx.ts_scaled_of(Timestamp::new(1320)), Some(1320 / 160));
    }

    #[test]
    fn broken_stride_restarts_proposal() {
        let mut ctx = RtpCompressorContext::new(ContextId::new(0), &config());
        ctx.initialize_from(&view(1, 1000, 1));
        ctx.track_ts_stride(Timestamp::new(1160));
        ctx.last_ts = Timestamp::new(1160);
        ctx.track_ts_stride(Timestamp::new(1260));
        assert_eq!(ctx.ts_stride, Some(100));
        assert_eq!(ctx.ts_phase, TsPhase::InitStride);
        assert_eq!(ctx.stride_transmissions, 0);
    }

    #[test]
    fn constant_timestamp_never_proposes_a_stride() {
        let mut ctx = RtpCompressorContext::new(ContextId::new(0), &config());
        ctx.initialize_from(&view(1, 1000, 1));
        ctx.track_ts_stride(Timestamp::new(1000));
        assert_eq!(ctx.ts_phase, TsPhase::InitTs);
        assert_eq!(ctx.ts_stride, None);
    }

    #[test]
    fn ip_id_offset_round_trips_through_decompressor() {
        let mut comp = RtpCompressorContext::new(ContextId::new(0), &config());
        comp.initialize_from(&view(100, 0, 150));
        let offset = comp.ip_id_offset_of(IpId::new(151), SequenceNumber::new(101));
        assert_eq!(offset, 50);

        let decomp = RtpDecompressorContext::new(ContextId::new(0));
        assert_eq!(
            decomp.ip_id_from_offset(offset, SequenceNumber::new(101)),
            IpId::new(151)
        );
    }

    #[test]
    fn reclassify_detects_divergence_to_random() {
        let mut ctx = RtpCompressorContext::new(ContextId::new(0), &config());
        ctx.initialize_from(&view(100, 0, 1000));
        assert!(!ctx.reclassify_ip_id(IpId::new(1001), SequenceNumber::new(101)));
        assert!(ctx.reclassify_ip_id(IpId::new(4242), SequenceNumber::new(102)));
        assert_eq!(ctx.ip_id_behavior, IpIdBehavior::Random);
    }

    #[test]
    fn decompressor_commit_rotates_references() {
        let mut ctx = RtpDecompressorContext::new(ContextId::new(0));
        ctx.commit(SequenceNumber::new(10), Timestamp::new(100), false, 5);
        ctx.commit(SequenceNumber::new(11), Timestamp::new(260), true, 5);
        assert_eq!(ctx.last_sn, 11);
        assert_eq!(ctx.prev_sn, Some(SequenceNumber::new(10)));
        assert_eq!(ctx.prev_ts, Some(Timestamp::new(100)));
    }
}
