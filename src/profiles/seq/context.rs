//! Contexts and packet views for the sequential-MSN profiles.

use std::any::Any;
use std::net::Ipv4Addr;

use crate::constants::{
    ESP_HEADER_LENGTH, IPV4_MIN_HEADER_LENGTH, IP_PROTOCOL_ESP, IP_PROTOCOL_UDP,
    IP_PROTOCOL_UDPLITE, UDP_HEADER_LENGTH,
};
use crate::encodings::WlsbWindow;
use crate::error::{NetworkLayer, RohcParsingError};
use crate::headers::{EspHeader, Ipv4Header, UdpHeader};
use crate::packet_defs::{DecompState, Features, IpIdBehavior, OperMode, RohcProfile};
use crate::state_machine::{CompressorStateMachine, DecompressorStateMachine};
use crate::traits::{CompressorProfileConfig, RohcCompressorContext, RohcDecompressorContext};
use crate::types::{ContextId, IpId, Msn};

/// Transport layer compressed on top of IPv4, selecting the chain layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// IP-only: the payload starts right after the IP header.
    None,
    /// UDP with its optional checksum.
    Udp,
    /// UDP-Lite: checksum mandatory, coverage tracked as a dynamic field.
    UdpLite,
    /// ESP: the MSN is the low half of the ESP sequence number.
    Esp,
}

impl Transport {
    /// IPv4 protocol number this transport matches.
    pub fn protocol(self) -> Option<u8> {
        match self {
            Transport::None => None,
            Transport::Udp => Some(IP_PROTOCOL_UDP),
            Transport::UdpLite => Some(IP_PROTOCOL_UDPLITE),
            Transport::Esp => Some(IP_PROTOCOL_ESP),
        }
    }

    /// Profile identifier of the transport's profile.
    pub fn profile(self) -> RohcProfile {
        match self {
            Transport::None => RohcProfile::Ip,
            Transport::Udp => RohcProfile::Udp,
            Transport::UdpLite => RohcProfile::UdpLite,
            Transport::Esp => RohcProfile::Esp,
        }
    }

    /// Transport header length in the uncompressed packet.
    pub fn header_len(self) -> usize {
        match self {
            Transport::None => 0,
            Transport::Udp | Transport::UdpLite => UDP_HEADER_LENGTH,
            Transport::Esp => ESP_HEADER_LENGTH,
        }
    }
}

/// Parsed headers of one uncompressed packet for these profiles.
#[derive(Debug, Clone)]
pub struct SeqPacketView {
    pub ip: Ipv4Header,
    pub udp: Option<UdpHeader>,
    pub esp: Option<EspHeader>,
    pub header_len: usize,
}

impl SeqPacketView {
    /// Parses the header stack demanded by `transport`.
    pub fn parse(packet: &[u8], transport: Transport) -> Result<SeqPacketView, RohcParsingError> {
        let ip = Ipv4Header::parse(packet)?;
        if let Some(expected) = transport.protocol() {
            if ip.protocol != expected {
                return Err(RohcParsingError::UnsupportedProtocol {
                    protocol_id: ip.protocol,
                    layer: NetworkLayer::Ip,
                });
            }
        }
        let rest = &packet[IPV4_MIN_HEADER_LENGTH..];
        let (udp, esp) = match transport {
            Transport::None => (None, None),
            Transport::Udp | Transport::UdpLite => (Some(UdpHeader::parse(rest)?), None),
            Transport::Esp => (None, Some(EspHeader::parse(rest)?)),
        };
        Ok(SeqPacketView {
            ip,
            udp,
            esp,
            header_len: IPV4_MIN_HEADER_LENGTH + transport.header_len(),
        })
    }
}

/// Compressor-side per-flow state.
#[derive(Debug)]
pub struct SeqCompressorContext {
    pub cid: ContextId,
    pub transport: Transport,
    pub mode: OperMode,
    pub features: Features,

    // Static chain.
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub spi: u32,

    // Quasi-static fields.
    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub udplite_coverage: u16,

    pub sm: CompressorStateMachine,

    // Dynamic fields.
    pub msn: Msn,
    pub esp_sn: u32,
    pub last_ip_id: IpId,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,

    pub msn_window: WlsbWindow,
    pub ip_id_window: WlsbWindow,

    /// A negative acknowledgement asked for a dynamic-chain refresh.
    pub ir_dyn_pending: bool,
    pub initialized: bool,
}

impl SeqCompressorContext {
    pub fn new(cid: ContextId, transport: Transport, config: &CompressorProfileConfig) -> Self {
        Self {
            cid,
            transport,
            mode: config.mode,
            features: config.features,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            protocol: 0,
            src_port: 0,
            dst_port: 0,
            spi: 0,
            tos: 0,
            ttl: 0,
            df: false,
            udp_checksum_present: false,
            udplite_coverage: 0,
            sm: CompressorStateMachine::new(config.ir_refresh_interval),
            msn: Msn::new(config.msn_seed),
            esp_sn: 0,
            last_ip_id: IpId::new(0),
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            msn_window: WlsbWindow::new(config.wlsb_width),
            ip_id_window: WlsbWindow::new(config.wlsb_width),
            ir_dyn_pending: false,
            initialized: false,
        }
    }

    /// Seeds the context from the first packet of the flow. The MSN keeps
    /// its unpredictable seed except for ESP, which dictates it.
    pub fn initialize_from(&mut self, view: &SeqPacketView) {
        self.ip_src = view.ip.src;
        self.ip_dst = view.ip.dst;
        self.protocol = view.ip.protocol;
        if let Some(udp) = &view.udp {
            self.src_port = udp.src_port;
            self.dst_port = udp.dst_port;
            self.udp_checksum_present =
                self.transport == Transport::UdpLite || udp.checksum != 0;
            if self.transport == Transport::UdpLite {
                self.udplite_coverage = udp.length_or_coverage;
            }
        }
        if let Some(esp) = &view.esp {
            self.spi = esp.spi;
            self.esp_sn = esp.sequence_number;
            self.msn = Msn::new(esp.sequence_number as u16);
        }
        self.tos = view.ip.tos;
        self.ttl = view.ip.ttl;
        self.df = view.ip.dont_fragment;

        self.last_ip_id = view.ip.identification;
        self.ip_id_behavior = if view.ip.identification == 0 {
            IpIdBehavior::Zero
        } else {
            IpIdBehavior::Sequential
        };
        self.last_ip_id_offset = self.ip_id_offset_of(view.ip.identification, self.msn);
        self.msn_window.clear();
        self.ip_id_window.clear();
        self.ir_dyn_pending = false;
        self.initialized = true;
    }

    /// IP-ID offset relative to the MSN under the current behavior.
    pub fn ip_id_offset_of(&self, ip_id: IpId, msn: Msn) -> u16 {
        let effective = match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => ip_id.swapped().value(),
            _ => ip_id.value(),
        };
        effective.wrapping_sub(msn.value())
    }
}

impl RohcCompressorContext for SeqCompressorContext {
    fn profile_id(&self) -> RohcProfile {
        self.transport.profile()
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
pub struct SeqDecompressorContext {
    pub cid: ContextId,
    pub transport: Transport,

    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub spi: u32,

    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub udplite_coverage: u16,

    pub sm: DecompressorStateMachine,

    pub last_msn: Msn,
    pub prev_msn: Option<Msn>,
    pub esp_sn: u32,
    pub ip_id_behavior: IpIdBehavior,
    pub last_ip_id_offset: u16,
    pub prev_ip_id_offset: Option<u16>,
}

impl SeqDecompressorContext {
    pub fn new(cid: ContextId, transport: Transport) -> Self {
        Self {
            cid,
            transport,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            protocol: 0,
            src_port: 0,
            dst_port: 0,
            spi: 0,
            tos: 0,
            ttl: 64,
            df: false,
            udp_checksum_present: false,
            udplite_coverage: 0,
            sm: DecompressorStateMachine::new(),
            last_msn: Msn::new(0),
            prev_msn: None,
            esp_sn: 0,
            ip_id_behavior: IpIdBehavior::Sequential,
            last_ip_id_offset: 0,
            prev_ip_id_offset: None,
        }
    }

    /// Rebuilds the IP-ID from a decoded offset and MSN.
    pub fn ip_id_from_offset(&self, offset: u16, msn: Msn) -> IpId {
        let value = offset.wrapping_add(msn.value());
        match self.ip_id_behavior {
            IpIdBehavior::SequentialSwapped => IpId::new(value.swap_bytes()),
            _ => IpId::new(value),
        }
    }

    /// Extends a decoded 16-bit MSN to the full 32-bit ESP sequence number
    /// using the signed distance from the last accepted value.
    pub fn esp_sn_from_msn(&self, msn: Msn) -> u32 {
        let delta = msn.wrapping_sub(Msn::new(self.esp_sn as u16)) as i16;
        self.esp_sn.wrapping_add_signed(delta as i32)
    }

    /// Commits the dynamic fields of an accepted packet.
    pub fn commit(&mut self, msn: Msn, ip_id_offset: u16) {
        self.prev_msn = Some(self.last_msn);
        self.prev_ip_id_offset = Some(self.last_ip_id_offset);
        self.last_msn = msn;
        self.last_ip_id_offset = ip_id_offset;
        if self.transport == Transport::Esp {
            self.esp_sn = self.esp_sn_from_msn(msn);
        }
    }
}

impl RohcDecompressorContext for SeqDecompressorContext {
    fn profile_id(&self) -> RohcProfile {
        self.transport.profile()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp_sn_extension_handles_wrap() {
        let mut ctx = SeqDecompressorContext::new(ContextId::new(0), Transport::Esp);
        ctx.esp_sn = 0x0001_FFFE;
        assert_eq!(ctx.esp_sn_from_msn(Msn::new(0xFFFF)), 0x0001_FFFF);
        assert_eq!(ctx.esp_sn_from_msn(Msn::new(0x0001)), 0x0002_0001);
        // A slightly older MSN resolves backwards, not a full wrap ahead.
        assert_eq!(ctx.esp_sn_from_msn(Msn::new(0xFFF0)), 0x0001_FFF0);
    }

    #[test]
    fn transport_descriptors() {
        assert_eq!(Transport::Udp.protocol(), Some(17));
        assert_eq!(Transport::Esp.protocol(), Some(50));
        assert_eq!(Transport::UdpLite.protocol(), Some(136));
        assert_eq!(Transport::None.protocol(), None);
        assert_eq!(Transport::Udp.profile(), RohcProfile::Udp);
        assert_eq!(Transport::None.header_len(), 0);
        assert_eq!(Transport::Esp.header_len(), 8);
    }
}
