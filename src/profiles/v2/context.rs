//! Contexts and packet views for the ROHCv2 profiles.

use std::any::Any;
use std::net::Ipv4Addr;

use crate::constants::{IPV4_MIN_HEADER_LENGTH, IPV6_HEADER_LENGTH, IP_PROTOCOL_UDP, UDP_HEADER_LENGTH};
use crate::encodings::WlsbWindow;
use crate::error::{NetworkLayer, RohcParsingError};
use crate::headers::{Ipv4Header, Ipv6Header, UdpHeader};
use crate::packet_defs::{DecompState, Features, IpIdBehavior, OperMode, RohcProfile};
use crate::state_machine::{CompressorStateMachine, DecompressorStateMachine};
use crate::traits::{CompressorProfileConfig, RohcCompressorContext, RohcDecompressorContext};
use crate::types::{ContextId, IpId, Msn};

/// Static description of the IP layer of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V2IpInfo {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
    },
    V6 {
        src: [u8; 16],
        dst: [u8; 16],
        next_header: u8,
        flow_label: u32,
    },
}

impl V2IpInfo {
    /// True for IPv4 flows (the only ones with an IP-ID).
    pub fn is_v4(&self) -> bool {
        matches!(self, V2IpInfo::V4 { .. })
    }
}

/// Parsed headers of one uncompressed packet.
#[derive(Debug, Clone)]
pub struct V2PacketView {
    pub ip4: Option<Ipv4Header>,
    pub ip6: Option<Ipv6Header>,
    pub udp: Option<UdpHeader>,
    pub header_len: usize,
}

impl V2PacketView {
    /// Parses an IPv4 or IPv6 packet, demanding UDP when `with_udp`.
    pub fn parse(packet: &[u8], with_udp: bool) -> Result<V2PacketView, RohcParsingError> {
        let version = packet.first().map(|b| b >> 4).unwrap_or(0);
        let (ip4, ip6, ip_len, protocol) = match version {
            4 => {
                let ip = Ipv4Header::parse(packet)?;
                let protocol = ip.protocol;
                (Some(ip), None, IPV4_MIN_HEADER_LENGTH, protocol)
            }
            6 => {
                let ip = Ipv6Header::parse(packet)?;
                let next_header = ip.next_header;
                (None, Some(ip), IPV6_HEADER_LENGTH, next_header)
            }
            got => {
                return Err(RohcParsingError::InvalidIpVersion { expected: 4, got });
            }
        };
        let udp = if with_udp {
            if protocol != IP_PROTOCOL_UDP {
                return Err(RohcParsingError::UnsupportedProtocol {
                    protocol_id: protocol,
                    layer: NetworkLayer::Ip,
                });
            }
            Some(UdpHeader::parse(&packet[ip_len..])?)
        } else {
            None
        };
        let header_len = ip_len + if with_udp { UDP_HEADER_LENGTH } else { 0 };
        Ok(V2PacketView {
            ip4,
            ip6,
            udp,
            header_len,
        })
    }

    /// Static IP information of this packet.
    pub fn ip_info(&self) -> V2IpInfo {
        if let Some(ip) = &self.ip4 {
            V2IpInfo::V4 {
                src: ip.src,
                dst: ip.dst,
                protocol: ip.protocol,
            }
        } else {
            let ip = self.ip6.as_ref().expect("one IP version present");
            V2IpInfo::V6 {
                src: ip.src,
                dst: ip.dst,
                next_header: ip.next_header,
                flow_label: ip.flow_label,
            }
        }
    }

    /// TOS / traffic class octet.
    pub fn tos(&self) -> u8 {
        self.ip4
            .as_ref()
            .map(|ip| ip.tos)
            .or_else(|| self.ip6.as_ref().map(|ip| ip.traffic_class))
            .unwrap_or(0)
    }

    /// TTL / hop limit octet.
    pub fn ttl(&self) -> u8 {
        self.ip4
            .as_ref()
            .map(|ip| ip.ttl)
            .or_else(|| self.ip6.as_ref().map(|ip| ip.hop_limit))
            .unwrap_or(0)
    }
}

/// Compressor-side per-flow state.
#[derive(Debug)]
pub struct V2CompressorContext {
    pub cid: ContextId,
    pub with_udp: bool,
    pub mode: OperMode,
    pub features: Features,

    pub ip_info: Option<V2IpInfo>,
    pub src_port: u16,
    pub dst_port: u16,

    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub checksum_used: bool,
    pub reorder_ratio: u8,

    pub sm: CompressorStateMachine,

    pub msn: Msn,
    pub last_ip_id: IpId,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,

    pub msn_window: WlsbWindow,
    pub ip_id_window: WlsbWindow,

    /// Set by a NACK: the next packet resynchronizes with co_repair.
    pub co_repair_pending: bool,
    pub initialized: bool,
}

impl V2CompressorContext {
    pub fn new(cid: ContextId, with_udp: bool, config: &CompressorProfileConfig) -> Self {
        Self {
            cid,
            with_udp,
            mode: config.mode,
            features: config.features,
            ip_info: None,
            src_port: 0,
            dst_port: 0,
            tos: 0,
            ttl: 0,
            df: false,
            checksum_used: false,
            reorder_ratio: 0,
            sm: CompressorStateMachine::new(config.ir_refresh_interval),
            msn: Msn::new(config.msn_seed),
            last_ip_id: IpId::new(0),
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            msn_window: WlsbWindow::new(config.wlsb_width),
            ip_id_window: WlsbWindow::new(config.wlsb_width),
            co_repair_pending: false,
            initialized: false,
        }
    }

    pub fn initialize_from(&mut self, view: &V2PacketView) {
        self.ip_info = Some(view.ip_info());
        if let Some(udp) = &view.udp {
            self.src_port = udp.src_port;
            self.dst_port = udp.dst_port;
            self.checksum_used = udp.checksum != 0;
        }
        self.tos = view.tos();
        self.ttl = view.ttl();
        if let Some(ip) = &view.ip4 {
            self.df = ip.dont_fragment;
            self.last_ip_id = ip.identification;
            self.ip_id_behavior = if ip.identification == 0 {
                IpIdBehavior::Zero
            } else {
                IpIdBehavior::Sequential
            };
        } else {
            // IPv6 has no Identification field.
            self.ip_id_behavior = IpIdBehavior::Zero;
        }
        self.last_ip_id_offset = self.ip_id_offset_of(self.last_ip_id, self.msn);
        self.msn_window.clear();
        self.ip_id_window.clear();
        self.co_repair_pending = false;
        self.initialized = true;
    }

    pub fn ip_id_offset_of(&self, ip_id: IpId, msn: Msn) -> u16 {
        let effective = match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => ip_id.swapped().value(),
            _ => ip_id.value(),
        };
        effective.wrapping_sub(msn.value())
    }

    pub fn is_v4(&self) -> bool {
        self.ip_info.as_ref().is_some_and(|info| info.is_v4())
    }
}

impl RohcCompressorContext for V2CompressorContext {
    fn profile_id(&self) -> RohcProfile {
        if self.with_udp {
            RohcProfile::V2Udp
        } else {
            RohcProfile::V2Ip
        }
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
pub struct V2DecompressorContext {
    pub cid: ContextId,
    pub with_udp: bool,
    pub features: Features,

    pub ip_info: Option<V2IpInfo>,
    pub src_port: u16,
    pub dst_port: u16,

    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub checksum_used: bool,
    pub reorder_ratio: u8,

    pub sm: DecompressorStateMachine,

    pub last_msn: Msn,
    pub prev_msn: Option<Msn>,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,
    pub prev_ip_id_offset: Option<u16>,
}

impl V2DecompressorContext {
    pub fn new(cid: ContextId, with_udp: bool) -> Self {
        Self {
            cid,
            with_udp,
            features: Features::NONE,
            ip_info: None,
            src_port: 0,
            dst_port: 0,
            tos: 0,
            ttl: 64,
            df: false,
            checksum_used: false,
            reorder_ratio: 0,
            sm: DecompressorStateMachine::new(),
            last_msn: Msn::new(0),
            prev_msn: None,
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            prev_ip_id_offset: None,
        }
    }

    pub fn is_v4(&self) -> bool {
        self.ip_info.as_ref().is_some_and(|info| info.is_v4())
    }

    pub fn ip_id_from_offset(&self, offset: u16, msn: Msn) -> IpId {
        let value = offset.wrapping_add(msn.value());
        match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => IpId::new(value.swap_bytes()),
            _ => IpId::new(value),
        }
    }

    pub fn commit(&mut self, msn: Msn, ip_id_offset: u16) {
        self.prev_msn = Some(self.last_msn);
        self.prev_ip_id_offset = Some(self.last_ip_id_offset);
        self.last_msn = msn;
        self.last_ip_id_offset = ip_id_offset;
    }
}

impl RohcDecompressorContext for V2DecompressorContext {
    fn profile_id(&self) -> RohcProfile {
        if self.with_udp {
            RohcProfile::V2Udp
        } else {
            RohcProfile::V2Ip
        }
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
            _ => Some(self.last_msn),
        }
    }
}
