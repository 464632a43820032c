//! Wire formats shared by the sequential-MSN profiles.
//!
//! The menu is the non-RTP one: IR, IR-DYN, UO-0 (`0 MSN(4) CRC3`), UO-1
//! (`10 IPID(6)` ; `MSN(5) CRC3`), UOR-2 (`110 MSN(5)` ; `X=0 CRC7`).
//! Chain contents vary by transport; the ESP dynamic chain carries the full
//! 32-bit sequence number, the others a 16-bit MSN.

use std::net::Ipv4Addr;

use crate::constants::{PACKET_TYPE_IR, PACKET_TYPE_IR_DYN};
use crate::crc::CrcCalculators;
use crate::error::{CrcType, ParseContext, RohcBuildingError, RohcParsingError};
use crate::packet_defs::{IpIdBehavior, RohcProfile};
use crate::types::{IpId, Msn};

use super::context::Transport;

/// MSN bits in UO-0.
pub const UO0_MSN_BITS: u8 = 4;
/// MSN bits in UO-1 and UOR-2.
pub const UO1_MSN_BITS: u8 = 5;
/// IP-ID offset bits in UO-1.
pub const UO1_IPID_BITS: u8 = 6;
/// MSN bits in UOR-2.
pub const UOR2_MSN_BITS: u8 = 5;

/// Dynamic chain flags octet, bit 6: IPv4 Don't Fragment.
pub const DYN_FLAG_DF: u8 = 0x40;
/// Dynamic chain flags octet, bit 5: UDP checksum present.
pub const DYN_FLAG_UDP_CHECKSUM: u8 = 0x20;

/// Discriminated packet type of a core packet for these profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqPacketType {
    Ir,
    IrDyn,
    Uo0,
    Uo1,
    Uor2,
    Unknown(u8),
}

impl SeqPacketType {
    /// Classifies the first core octet.
    pub fn detect(first: u8) -> SeqPacketType {
        if first == PACKET_TYPE_IR {
            SeqPacketType::Ir
        } else if first == PACKET_TYPE_IR_DYN {
            SeqPacketType::IrDyn
        } else if first & 0x80 == 0 {
            SeqPacketType::Uo0
        } else if first & 0xC0 == 0x80 {
            SeqPacketType::Uo1
        } else if first & 0xE0 == 0xC0 {
            SeqPacketType::Uor2
        } else {
            SeqPacketType::Unknown(first)
        }
    }
}

/// Static chain contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqStaticChain {
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub protocol: u8,
    /// UDP / UDP-Lite ports.
    pub ports: Option<(u16, u16)>,
    /// ESP security parameters index.
    pub spi: Option<u32>,
}

/// Dynamic chain contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqDynamicChain {
    pub tos: u8,
    pub ttl: u8,
    pub ip_id: IpId,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub ip_id_behavior: IpIdBehavior,
    /// MSN for the non-ESP transports.
    pub msn: Msn,
    /// Full sequence number for ESP; the MSN is its low half.
    pub esp_sn: Option<u32>,
    /// UDP-Lite checksum coverage.
    pub coverage: Option<u16>,
    /// UDP / UDP-Lite checksum value.
    pub checksum: Option<u16>,
}

fn static_chain_len(transport: Transport) -> usize {
    9 + match transport {
        Transport::None => 0,
        Transport::Udp | Transport::UdpLite => 4,
        Transport::Esp => 4,
    }
}

fn dynamic_chain_len(transport: Transport) -> usize {
    6 + match transport {
        Transport::None => 2,
        Transport::Udp => 4,
        Transport::UdpLite => 6,
        Transport::Esp => 4,
    }
}

fn write_static_chain(chain: &SeqStaticChain, out: &mut [u8]) -> usize {
    out[0..4].copy_from_slice(&chain.ip_src.octets());
    out[4..8].copy_from_slice(&chain.ip_dst.octets());
    out[8] = chain.protocol;
    let mut at = 9;
    if let Some((src, dst)) = chain.ports {
        out[at..at + 2].copy_from_slice(&src.to_be_bytes());
        out[at + 2..at + 4].copy_from_slice(&dst.to_be_bytes());
        at += 4;
    }
    if let Some(spi) = chain.spi {
        out[at..at + 4].copy_from_slice(&spi.to_be_bytes());
        at += 4;
    }
    at
}

fn read_static_chain(data: &[u8], transport: Transport) -> SeqStaticChain {
    let mut at = 9;
    let ports = match transport {
        Transport::Udp | Transport::UdpLite => {
            let ports = (
                u16::from_be_bytes([data[at], data[at + 1]]),
                u16::from_be_bytes([data[at + 2], data[at + 3]]),
            );
            at += 4;
            Some(ports)
        }
        _ => None,
    };
    let spi = match transport {
        Transport::Esp => Some(u32::from_be_bytes([
            data[at],
            data[at + 1],
            data[at + 2],
            data[at + 3],
        ])),
        _ => None,
    };
    SeqStaticChain {
        ip_src: Ipv4Addr::new(data[0], data[1], data[2], data[3]),
        ip_dst: Ipv4Addr::new(data[4], data[5], data[6], data[7]),
        protocol: data[8],
        ports,
        spi,
    }
}

fn write_dynamic_chain(chain: &SeqDynamicChain, transport: Transport, out: &mut [u8]) -> usize {
    out[0] = chain.tos;
    out[1] = chain.ttl;
    out[2..4].copy_from_slice(&chain.ip_id.value().to_be_bytes());
    let mut flags = 0u8;
    if chain.df {
        flags |= DYN_FLAG_DF;
    }
    if chain.udp_checksum_present {
        flags |= DYN_FLAG_UDP_CHECKSUM;
    }
    out[4] = flags;
    out[5] = chain.ip_id_behavior.wire_code();
    let mut at = 6;
    match transport {
        Transport::Esp => {
            let esp_sn = chain.esp_sn.unwrap_or(chain.msn.value() as u32);
            out[at..at + 4].copy_from_slice(&esp_sn.to_be_bytes());
            at += 4;
        }
        _ => {
            out[at..at + 2].copy_from_slice(&chain.msn.value().to_be_bytes());
            at += 2;
            if transport == Transport::UdpLite {
                out[at..at + 2].copy_from_slice(&chain.coverage.unwrap_or(0).to_be_bytes());
                at += 2;
            }
            if matches!(transport, Transport::Udp | Transport::UdpLite) {
                out[at..at + 2].copy_from_slice(&chain.checksum.unwrap_or(0).to_be_bytes());
                at += 2;
            }
        }
    }
    at
}

fn read_dynamic_chain(data: &[u8], transport: Transport) -> SeqDynamicChain {
    let flags = data[4];
    let mut at = 6;
    let (msn, esp_sn) = match transport {
        Transport::Esp => {
            let sn = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
            at += 4;
            (Msn::new(sn as u16), Some(sn))
        }
        _ => {
            let msn = Msn::new(u16::from_be_bytes([data[at], data[at + 1]]));
            at += 2;
            (msn, None)
        }
    };
    let coverage = if transport == Transport::UdpLite {
        let v = u16::from_be_bytes([data[at], data[at + 1]]);
        at += 2;
        Some(v)
    } else {
        None
    };
    let checksum = if matches!(transport, Transport::Udp | Transport::UdpLite) {
        Some(u16::from_be_bytes([data[at], data[at + 1]]))
    } else {
        None
    };
    SeqDynamicChain {
        tos: data[0],
        ttl: data[1],
        ip_id: IpId::new(u16::from_be_bytes([data[2], data[3]])),
        df: flags & DYN_FLAG_DF != 0,
        udp_checksum_present: flags & DYN_FLAG_UDP_CHECKSUM != 0,
        ip_id_behavior: IpIdBehavior::from_wire_code(data[5]),
        msn,
        esp_sn,
        coverage,
        checksum,
    }
}

fn check_capacity(out: &[u8], needed: usize, ctx: ParseContext) -> Result<(), RohcBuildingError> {
    if out.len() < needed {
        return Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context: ctx,
        });
    }
    Ok(())
}

/// Serializes an IR packet.
pub fn serialize_ir(
    profile: RohcProfile,
    transport: Transport,
    static_chain: &SeqStaticChain,
    dynamic_chain: &SeqDynamicChain,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 3 + static_chain_len(transport) + dynamic_chain_len(transport);
    check_capacity(out, needed, ParseContext::IrPacket)?;
    out[0] = PACKET_TYPE_IR;
    out[1] = profile.lsb_octet();
    out[2] = 0;
    let mut at = 3 + write_static_chain(static_chain, &mut out[3..]);
    at += write_dynamic_chain(dynamic_chain, transport, &mut out[at..]);
    out[2] = crc.crc8(&out[..at]);
    Ok(at)
}

/// Serializes an IR-DYN packet.
pub fn serialize_ir_dyn(
    profile: RohcProfile,
    transport: Transport,
    dynamic_chain: &SeqDynamicChain,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 3 + dynamic_chain_len(transport);
    check_capacity(out, needed, ParseContext::IrDynPacket)?;
    out[0] = PACKET_TYPE_IR_DYN;
    out[1] = profile.lsb_octet();
    out[2] = 0;
    let at = 3 + write_dynamic_chain(dynamic_chain, transport, &mut out[3..]);
    out[2] = crc.crc8(&out[..at]);
    Ok(at)
}

fn check_ir_crc(core: &[u8], total: usize, crc: &CrcCalculators) -> Result<(), RohcParsingError> {
    let mut scratch = [0u8; 64];
    scratch[..total].copy_from_slice(&core[..total]);
    let carried = scratch[2];
    scratch[2] = 0;
    let computed = crc.crc8(&scratch[..total]);
    if computed != carried {
        return Err(RohcParsingError::CrcMismatch {
            expected: carried,
            calculated: computed,
            crc_type: CrcType::Crc8,
        });
    }
    Ok(())
}

/// Parses and CRC-checks an IR packet.
pub fn parse_ir(
    core: &[u8],
    transport: Transport,
    crc: &CrcCalculators,
) -> Result<(SeqStaticChain, SeqDynamicChain, usize), RohcParsingError> {
    let total = 3 + static_chain_len(transport) + dynamic_chain_len(transport);
    if core.len() < total {
        return Err(RohcParsingError::NotEnoughData {
            needed: total,
            got: core.len(),
            context: ParseContext::IrPacket,
        });
    }
    check_ir_crc(core, total, crc)?;
    let static_chain = read_static_chain(&core[3..], transport);
    let dynamic_chain =
        read_dynamic_chain(&core[3 + static_chain_len(transport)..], transport);
    Ok((static_chain, dynamic_chain, total))
}

/// Parses and CRC-checks an IR-DYN packet.
pub fn parse_ir_dyn(
    core: &[u8],
    transport: Transport,
    crc: &CrcCalculators,
) -> Result<(SeqDynamicChain, usize), RohcParsingError> {
    let total = 3 + dynamic_chain_len(transport);
    if core.len() < total {
        return Err(RohcParsingError::NotEnoughData {
            needed: total,
            got: core.len(),
            context: ParseContext::IrDynPacket,
        });
    }
    check_ir_crc(core, total, crc)?;
    let dynamic_chain = read_dynamic_chain(&core[3..], transport);
    Ok((dynamic_chain, total))
}

/// Irregular fields behind compressed base headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqIrregular {
    pub rand_ip_id: Option<u16>,
    pub udp_checksum: Option<u16>,
}

impl SeqIrregular {
    fn wire_len(&self) -> usize {
        self.rand_ip_id.map_or(0, |_| 2) + self.udp_checksum.map_or(0, |_| 2)
    }

    fn write(&self, out: &mut [u8]) -> usize {
        let mut at = 0;
        if let Some(ip_id) = self.rand_ip_id {
            out[at..at + 2].copy_from_slice(&ip_id.to_be_bytes());
            at += 2;
        }
        if let Some(checksum) = self.udp_checksum {
            out[at..at + 2].copy_from_slice(&checksum.to_be_bytes());
            at += 2;
        }
        at
    }

    fn read(
        data: &[u8],
        random_ip_id: bool,
        udp_checksum: bool,
    ) -> Result<(SeqIrregular, usize), RohcParsingError> {
        let needed = usize::from(random_ip_id) * 2 + usize::from(udp_checksum) * 2;
        if data.len() < needed {
            return Err(RohcParsingError::NotEnoughData {
                needed,
                got: data.len(),
                context: ParseContext::IrregularChain,
            });
        }
        let mut at = 0;
        let rand_ip_id = random_ip_id.then(|| {
            let v = u16::from_be_bytes([data[at], data[at + 1]]);
            at += 2;
            v
        });
        let udp_checksum = udp_checksum.then(|| {
            let v = u16::from_be_bytes([data[at], data[at + 1]]);
            at += 2;
            v
        });
        Ok((
            SeqIrregular {
                rand_ip_id,
                udp_checksum,
            },
            at,
        ))
    }
}

/// Staged fields of a compressed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqUoFields {
    pub packet_type: SeqPacketType,
    pub msn_lsbs: u16,
    pub msn_bits: u8,
    pub ip_id_lsbs: Option<u16>,
    pub ip_id_bits: u8,
    pub crc: u8,
    pub crc_bits: u8,
    pub irregular: SeqIrregular,
    pub consumed: usize,
}

/// CRC reference input: profile id, full sequence value, IP-ID, TOS, TTL.
pub fn seq_crc_input(
    profile: RohcProfile,
    full_sn: u32,
    ip_id: IpId,
    tos: u8,
    ttl: u8,
) -> [u8; 10] {
    let mut input = [0u8; 10];
    input[0..2].copy_from_slice(&u16::from(profile).to_be_bytes());
    input[2..6].copy_from_slice(&full_sn.to_be_bytes());
    input[6..8].copy_from_slice(&ip_id.value().to_be_bytes());
    input[8] = tos;
    input[9] = ttl;
    input
}

/// Serializes a UO-0 packet.
pub fn serialize_uo0(
    msn_lsbs: u8,
    crc3: u8,
    irregular: &SeqIrregular,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(msn_lsbs < (1 << UO0_MSN_BITS) && crc3 <= 0x07);
    check_capacity(out, 1 + irregular.wire_len(), ParseContext::Uo0Packet)?;
    out[0] = (msn_lsbs << 3) | crc3;
    let irr = irregular.write(&mut out[1..]);
    Ok(1 + irr)
}

/// Serializes a UO-1 packet.
pub fn serialize_uo1(
    ip_id_lsbs: u8,
    msn_lsbs: u8,
    crc3: u8,
    irregular: &SeqIrregular,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(ip_id_lsbs < (1 << UO1_IPID_BITS) && msn_lsbs < (1 << UO1_MSN_BITS));
    check_capacity(out, 2 + irregular.wire_len(), ParseContext::Uo1Packet)?;
    out[0] = 0x80 | (ip_id_lsbs & 0x3F);
    out[1] = ((msn_lsbs & 0x1F) << 3) | (crc3 & 0x07);
    let irr = irregular.write(&mut out[2..]);
    Ok(2 + irr)
}

/// Serializes a UOR-2 packet.
pub fn serialize_uor2(
    msn_lsbs: u8,
    crc7: u8,
    irregular: &SeqIrregular,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(msn_lsbs < (1 << UOR2_MSN_BITS) && crc7 <= 0x7F);
    check_capacity(out, 2 + irregular.wire_len(), ParseContext::Uor2Packet)?;
    out[0] = 0xC0 | (msn_lsbs & 0x1F);
    out[1] = crc7 & 0x7F;
    let irr = irregular.write(&mut out[2..]);
    Ok(2 + irr)
}

/// Parses any compressed packet into staged fields.
pub fn parse_uo(
    core: &[u8],
    random_ip_id: bool,
    udp_checksum: bool,
) -> Result<SeqUoFields, RohcParsingError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;
    let packet_type = SeqPacketType::detect(first);

    let mut fields = SeqUoFields {
        packet_type,
        msn_lsbs: 0,
        msn_bits: 0,
        ip_id_lsbs: None,
        ip_id_bits: 0,
        crc: 0,
        crc_bits: 0,
        irregular: SeqIrregular::default(),
        consumed: 0,
    };

    let at = match packet_type {
        SeqPacketType::Uo0 => {
            fields.msn_lsbs = ((first >> 3) & 0x0F) as u16;
            fields.msn_bits = UO0_MSN_BITS;
            fields.crc = first & 0x07;
            fields.crc_bits = 3;
            1
        }
        SeqPacketType::Uo1 => {
            let second = *core.get(1).ok_or(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::Uo1Packet,
            })?;
            fields.ip_id_lsbs = Some((first & 0x3F) as u16);
            fields.ip_id_bits = UO1_IPID_BITS;
            fields.msn_lsbs = ((second >> 3) & 0x1F) as u16;
            fields.msn_bits = UO1_MSN_BITS;
            fields.crc = second & 0x07;
            fields.crc_bits = 3;
            2
        }
        SeqPacketType::Uor2 => {
            let second = *core.get(1).ok_or(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::Uor2Packet,
            })?;
            if second & 0x80 != 0 {
                return Err(RohcParsingError::ReservedBitsSet {
                    context: ParseContext::Uor2Packet,
                });
            }
            fields.msn_lsbs = (first & 0x1F) as u16;
            fields.msn_bits = UOR2_MSN_BITS;
            fields.crc = second & 0x7F;
            fields.crc_bits = 7;
            2
        }
        SeqPacketType::Ir | SeqPacketType::IrDyn | SeqPacketType::Unknown(_) => {
            return Err(RohcParsingError::UnknownPacketType {
                discriminator: first,
                profile_id: None,
            });
        }
    };

    let (irregular, irr_len) = SeqIrregular::read(&core[at..], random_ip_id, udp_checksum)?;
    fields.irregular = irregular;
    fields.consumed = at + irr_len;
    Ok(fields)
}
