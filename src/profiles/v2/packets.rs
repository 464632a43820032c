//! ROHCv2 wire formats: chains, compressed packets and the control CRC.
//!
//! Packet layouts follow RFC 5225 Section 6.8: pt_0_crc3 `0 MSN(4) CRC3`,
//! pt_0_crc7 `100 MSN(6) CRC7`, pt_1_seq_id `101 CRC3 MSN(6) IPID(4)`,
//! pt_2_seq_id `110 IPID(6) CRC7 MSN(8)`, co_common `11111010` with
//! indicator-gated fields, co_repair `11111011` with both CRCs and the
//! dynamic chain.

use crate::constants::{PACKET_TYPE_CO_COMMON, PACKET_TYPE_CO_REPAIR, PACKET_TYPE_IR};
use crate::crc::CrcCalculators;
use crate::error::{CrcType, ParseContext, RohcBuildingError, RohcParsingError};
use crate::packet_defs::{IpIdBehavior, RohcProfile};
use crate::types::{IpId, Msn};

use super::context::V2IpInfo;

/// MSN bits per format.
pub const PT0_CRC3_MSN_BITS: u8 = 4;
pub const PT0_CRC7_MSN_BITS: u8 = 6;
pub const PT1_MSN_BITS: u8 = 6;
pub const PT1_IPID_BITS: u8 = 4;
pub const PT2_MSN_BITS: u8 = 8;
pub const PT2_IPID_BITS: u8 = 6;
pub const CO_COMMON_MSN_BITS: u8 = 8;

/// Discriminated type of a core ROHCv2 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V2PacketType {
    Ir,
    Pt0Crc3,
    Pt0Crc7,
    Pt1SeqId,
    Pt2SeqId,
    CoCommon,
    CoRepair,
    Unknown(u8),
}

impl V2PacketType {
    /// Classifies the first core octet.
    pub fn detect(first: u8) -> V2PacketType {
        if first == PACKET_TYPE_IR {
            V2PacketType::Ir
        } else if first == PACKET_TYPE_CO_COMMON {
            V2PacketType::CoCommon
        } else if first == PACKET_TYPE_CO_REPAIR {
            V2PacketType::CoRepair
        } else if first & 0x80 == 0 {
            V2PacketType::Pt0Crc3
        } else if first & 0xE0 == 0x80 {
            V2PacketType::Pt0Crc7
        } else if first & 0xE0 == 0xA0 {
            V2PacketType::Pt1SeqId
        } else if first & 0xE0 == 0xC0 {
            V2PacketType::Pt2SeqId
        } else {
            V2PacketType::Unknown(first)
        }
    }
}

/// Dynamic state carried by chains and co_repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2DynamicFields {
    pub tos: u8,
    pub ttl: u8,
    pub df: bool,
    pub reorder_ratio: u8,
    pub ip_id_behavior: IpIdBehavior,
    pub ip_id: IpId,
    pub msn: Msn,
    /// UDP checksum value (profile 0x0102 only).
    pub udp_checksum: Option<u16>,
}

/// CRC-3 over decoded control fields: reorder_ratio, MSN and, per RFC 5225
/// erratum 2703, the IP-ID behaviors of IPv4 headers only. The pre-erratum
/// compatibility mode also feeds the behavior of IPv6 headers (which have
/// none; a zero placeholder) into the CRC.
pub fn control_crc3(
    crc: &CrcCalculators,
    reorder_ratio: u8,
    msn: Msn,
    ipv4_behaviors: &[IpIdBehavior],
    ipv6_headers_included: usize,
) -> u8 {
    let mut input = [0u8; 8];
    input[0] = reorder_ratio & 0x03;
    input[1..3].copy_from_slice(&msn.value().to_be_bytes());
    let mut len = 3;
    for behavior in ipv4_behaviors {
        input[len] = behavior.wire_code();
        len += 1;
    }
    for _ in 0..ipv6_headers_included {
        input[len] = 0;
        len += 1;
    }
    crc.crc3(&input[..len])
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

// --- Chains ---

fn static_chain_len(info: &V2IpInfo, with_udp: bool) -> usize {
    let ip = match info {
        V2IpInfo::V4 { .. } => 10,
        V2IpInfo::V6 { .. } => 38,
    };
    ip + if with_udp { 4 } else { 0 }
}

fn write_static_chain(
    info: &V2IpInfo,
    ports: Option<(u16, u16)>,
    out: &mut [u8],
) -> usize {
    let mut at = match info {
        V2IpInfo::V4 { src, dst, protocol } => {
            out[0] = 0; // version flag clear: IPv4
            out[1] = *protocol;
            out[2..6].copy_from_slice(&src.octets());
            out[6..10].copy_from_slice(&dst.octets());
            10
        }
        V2IpInfo::V6 {
            src,
            dst,
            next_header,
            flow_label,
        } => {
            out[0] = 0x80; // version flag set: IPv6
            out[1] = *next_header;
            out[2] = (flow_label >> 16) as u8 & 0x0F;
            out[3] = (flow_label >> 8) as u8;
            out[4] = *flow_label as u8;
            out[5..21].copy_from_slice(src);
            out[21..37].copy_from_slice(dst);
            out[37] = 0;
            38
        }
    };
    if let Some((src, dst)) = ports {
        out[at..at + 2].copy_from_slice(&src.to_be_bytes());
        out[at + 2..at + 4].copy_from_slice(&dst.to_be_bytes());
        at += 4;
    }
    at
}

fn read_static_chain(
    data: &[u8],
    with_udp: bool,
) -> Result<(V2IpInfo, Option<(u16, u16)>, usize), RohcParsingError> {
    let first = *data.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::StaticChain,
    })?;
    let is_v6 = first & 0x80 != 0;
    let ip_len = if is_v6 { 38 } else { 10 };
    let needed = ip_len + if with_udp { 4 } else { 0 };
    if data.len() < needed {
        return Err(RohcParsingError::NotEnoughData {
            needed,
            got: data.len(),
            context: ParseContext::StaticChain,
        });
    }
    let info = if is_v6 {
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&data[5..21]);
        dst.copy_from_slice(&data[21..37]);
        V2IpInfo::V6 {
            src,
            dst,
            next_header: data[1],
            flow_label: (((data[2] & 0x0F) as u32) << 16)
                | ((data[3] as u32) << 8)
                | data[4] as u32,
        }
    } else {
        V2IpInfo::V4 {
            src: std::net::Ipv4Addr::new(data[2], data[3], data[4], data[5]),
            dst: std::net::Ipv4Addr::new(data[6], data[7], data[8], data[9]),
            protocol: data[1],
        }
    };
    let ports = with_udp.then(|| {
        (
            u16::from_be_bytes([data[ip_len], data[ip_len + 1]]),
            u16::from_be_bytes([data[ip_len + 2], data[ip_len + 3]]),
        )
    });
    Ok((info, ports, needed))
}

fn dynamic_chain_len(fields: &V2DynamicFields, is_v4: bool, with_udp: bool) -> usize {
    // IPv4: behavior octet, tos, ttl [, ip_id] ; IPv6: rr octet, tc, hl.
    let ip = if is_v4 {
        3 + if fields.ip_id_behavior != IpIdBehavior::Zero {
            2
        } else {
            0
        }
    } else {
        3
    };
    // The MSN rides in the UDP dynamic part when UDP is compressed.
    ip + if with_udp { 4 } else { 2 }
}

fn write_dynamic_chain(
    fields: &V2DynamicFields,
    is_v4: bool,
    with_udp: bool,
    out: &mut [u8],
) -> usize {
    let mut at = if is_v4 {
        out[0] = fields.ip_id_behavior.wire_code()
            | (u8::from(fields.df) << 2)
            | ((fields.reorder_ratio & 0x03) << 3);
        out[1] = fields.tos;
        out[2] = fields.ttl;
        let mut at = 3;
        if fields.ip_id_behavior != IpIdBehavior::Zero {
            out[at..at + 2].copy_from_slice(&fields.ip_id.value().to_be_bytes());
            at += 2;
        }
        at
    } else {
        out[0] = fields.reorder_ratio & 0x03;
        out[1] = fields.tos;
        out[2] = fields.ttl;
        3
    };
    if with_udp {
        out[at..at + 2].copy_from_slice(&fields.udp_checksum.unwrap_or(0).to_be_bytes());
        out[at + 2..at + 4].copy_from_slice(&fields.msn.value().to_be_bytes());
        at += 4;
    } else {
        out[at..at + 2].copy_from_slice(&fields.msn.value().to_be_bytes());
        at += 2;
    }
    at
}

fn read_dynamic_chain(
    data: &[u8],
    is_v4: bool,
    with_udp: bool,
) -> Result<(V2DynamicFields, usize), RohcParsingError> {
    if data.len() < 5 {
        return Err(RohcParsingError::NotEnoughData {
            needed: 5,
            got: data.len(),
            context: ParseContext::DynamicChain,
        });
    }
    let (mut fields, mut at) = if is_v4 {
        let behavior = IpIdBehavior::from_wire_code(data[0]);
        let mut fields = V2DynamicFields {
            tos: data[1],
            ttl: data[2],
            df: data[0] & 0x04 != 0,
            reorder_ratio: (data[0] >> 3) & 0x03,
            ip_id_behavior: behavior,
            ip_id: IpId::new(0),
            msn: Msn::new(0),
            udp_checksum: None,
        };
        let mut at = 3;
        if behavior != IpIdBehavior::Zero {
            if data.len() < at + 2 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: at + 2,
                    got: data.len(),
                    context: ParseContext::DynamicChain,
                });
            }
            fields.ip_id = IpId::new(u16::from_be_bytes([data[at], data[at + 1]]));
            at += 2;
        }
        (fields, at)
    } else {
        (
            V2DynamicFields {
                tos: data[1],
                ttl: data[2],
                df: false,
                reorder_ratio: data[0] & 0x03,
                ip_id_behavior: IpIdBehavior::Zero,
                ip_id: IpId::new(0),
                msn: Msn::new(0),
                udp_checksum: None,
            },
            3,
        )
    };
    let tail = if with_udp { 4 } else { 2 };
    if data.len() < at + tail {
        return Err(RohcParsingError::NotEnoughData {
            needed: at + tail,
            got: data.len(),
            context: ParseContext::DynamicChain,
        });
    }
    if with_udp {
        fields.udp_checksum = Some(u16::from_be_bytes([data[at], data[at + 1]]));
        fields.msn = Msn::new(u16::from_be_bytes([data[at + 2], data[at + 3]]));
        at += 4;
    } else {
        fields.msn = Msn::new(u16::from_be_bytes([data[at], data[at + 1]]));
        at += 2;
    }
    Ok((fields, at))
}

// --- IR ---

/// Serializes a ROHCv2 IR packet.
pub fn serialize_ir(
    profile: RohcProfile,
    info: &V2IpInfo,
    ports: Option<(u16, u16)>,
    fields: &V2DynamicFields,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let with_udp = ports.is_some();
    let needed =
        3 + static_chain_len(info, with_udp) + dynamic_chain_len(fields, info.is_v4(), with_udp);
    check_capacity(out, needed, ParseContext::IrPacket)?;
    out[0] = PACKET_TYPE_IR;
    out[1] = profile.lsb_octet();
    out[2] = 0;
    let mut at = 3 + write_static_chain(info, ports, &mut out[3..]);
    at += write_dynamic_chain(fields, info.is_v4(), with_udp, &mut out[at..]);
    out[2] = crc.crc8(&out[..at]);
    Ok(at)
}

/// Parses and CRC-checks a ROHCv2 IR packet.
pub fn parse_ir(
    core: &[u8],
    with_udp: bool,
    crc: &CrcCalculators,
) -> Result<(V2IpInfo, Option<(u16, u16)>, V2DynamicFields, usize), RohcParsingError> {
    if core.len() < 3 {
        return Err(RohcParsingError::NotEnoughData {
            needed: 3,
            got: core.len(),
            context: ParseContext::IrPacket,
        });
    }
    let (info, ports, static_len) = read_static_chain(&core[3..], with_udp)?;
    let (fields, dyn_len) = read_dynamic_chain(&core[3 + static_len..], info.is_v4(), with_udp)?;
    let total = 3 + static_len + dyn_len;

    let mut scratch = [0u8; 96];
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
    Ok((info, ports, fields, total))
}

// --- Compressed packets ---

/// Staged fields of one compressed ROHCv2 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2CoFields {
    pub packet_type: V2PacketType,
    pub msn_lsbs: u16,
    pub msn_bits: u8,
    pub ip_id_lsbs: Option<u16>,
    pub ip_id_bits: u8,
    pub header_crc: u8,
    pub header_crc_bits: u8,
    /// co_common / co_repair control CRC.
    pub control_crc: Option<u8>,
    /// co_common optional fields.
    pub new_tos: Option<u8>,
    pub new_ttl: Option<u8>,
    pub new_df: Option<bool>,
    pub new_behavior: Option<IpIdBehavior>,
    pub new_ip_id: Option<u16>,
    pub reorder_ratio: Option<u8>,
    /// co_repair replacement dynamic chain.
    pub repair_fields: Option<V2DynamicFields>,
    /// Irregular chain.
    pub rand_ip_id: Option<u16>,
    pub udp_checksum: Option<u16>,
    pub consumed: usize,
}

impl V2CoFields {
    fn empty(packet_type: V2PacketType) -> Self {
        Self {
            packet_type,
            msn_lsbs: 0,
            msn_bits: 0,
            ip_id_lsbs: None,
            ip_id_bits: 0,
            header_crc: 0,
            header_crc_bits: 0,
            control_crc: None,
            new_tos: None,
            new_ttl: None,
            new_df: None,
            new_behavior: None,
            new_ip_id: None,
            reorder_ratio: None,
            repair_fields: None,
            rand_ip_id: None,
            udp_checksum: None,
            consumed: 0,
        }
    }
}

/// Serializes pt_0_crc3.
pub fn serialize_pt0_crc3(msn_lsbs: u8, crc3: u8, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    debug_assert!(msn_lsbs < 16 && crc3 <= 7);
    check_capacity(out, 1, ParseContext::Pt0Packet)?;
    out[0] = (msn_lsbs << 3) | crc3;
    Ok(1)
}

/// Serializes pt_0_crc7.
pub fn serialize_pt0_crc7(msn_lsbs: u8, crc7: u8, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    debug_assert!(msn_lsbs < 64 && crc7 <= 0x7F);
    check_capacity(out, 2, ParseContext::Pt0Packet)?;
    out[0] = 0x80 | (msn_lsbs >> 1);
    out[1] = ((msn_lsbs & 0x01) << 7) | crc7;
    Ok(2)
}

/// Serializes pt_1_seq_id.
pub fn serialize_pt1(
    msn_lsbs: u8,
    ip_id_lsbs: u8,
    crc3: u8,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(msn_lsbs < 64 && ip_id_lsbs < 16 && crc3 <= 7);
    check_capacity(out, 2, ParseContext::Pt1Packet)?;
    out[0] = 0xA0 | (crc3 << 2) | (msn_lsbs >> 4);
    out[1] = ((msn_lsbs & 0x0F) << 4) | (ip_id_lsbs & 0x0F);
    Ok(2)
}

/// Serializes pt_2_seq_id.
pub fn serialize_pt2(
    msn_lsbs: u8,
    ip_id_lsbs: u8,
    crc7: u8,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(ip_id_lsbs < 64 && crc7 <= 0x7F);
    check_capacity(out, 3, ParseContext::Pt2Packet)?;
    out[0] = 0xC0 | (ip_id_lsbs >> 1);
    out[1] = ((ip_id_lsbs & 0x01) << 7) | crc7;
    out[2] = msn_lsbs;
    Ok(3)
}

/// Optional field set of a co_common packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoCommonOptions {
    pub tos: Option<u8>,
    pub ttl: Option<u8>,
    pub flags: Option<(bool, IpIdBehavior)>,
    pub ip_id: Option<u16>,
}

/// Serializes co_common.
pub fn serialize_co_common(
    msn_lsbs: u8,
    crc7: u8,
    control_crc3: u8,
    reorder_ratio: u8,
    options: &CoCommonOptions,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 4
        + options.flags.map_or(0, |_| 1)
        + options.tos.map_or(0, |_| 1)
        + options.ttl.map_or(0, |_| 1)
        + options.ip_id.map_or(0, |_| 2);
    check_capacity(out, needed, ParseContext::CoCommonPacket)?;
    out[0] = PACKET_TYPE_CO_COMMON;
    out[1] = ((options.ip_id.is_some() as u8) << 7) | (crc7 & 0x7F);
    out[2] = ((options.flags.is_some() as u8) << 7)
        | ((options.ttl.is_some() as u8) << 6)
        | ((options.tos.is_some() as u8) << 5)
        | ((reorder_ratio & 0x03) << 3)
        | (control_crc3 & 0x07);
    out[3] = msn_lsbs;
    let mut at = 4;
    if let Some((df, behavior)) = options.flags {
        out[at] = ((df as u8) << 2) | behavior.wire_code();
        at += 1;
    }
    if let Some(tos) = options.tos {
        out[at] = tos;
        at += 1;
    }
    if let Some(ttl) = options.ttl {
        out[at] = ttl;
        at += 1;
    }
    if let Some(ip_id) = options.ip_id {
        out[at..at + 2].copy_from_slice(&ip_id.to_be_bytes());
        at += 2;
    }
    Ok(at)
}

/// Serializes co_repair: both CRCs plus the full dynamic chain.
pub fn serialize_co_repair(
    fields: &V2DynamicFields,
    is_v4: bool,
    with_udp: bool,
    crc7: u8,
    control_crc3: u8,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 3 + dynamic_chain_len(fields, is_v4, with_udp);
    check_capacity(out, needed, ParseContext::CoRepairPacket)?;
    out[0] = PACKET_TYPE_CO_REPAIR;
    out[1] = crc7 & 0x7F;
    out[2] = control_crc3 & 0x07;
    let at = 3 + write_dynamic_chain(fields, is_v4, with_udp, &mut out[3..]);
    Ok(at)
}

/// Parses any compressed ROHCv2 packet into staged fields.
pub fn parse_co(
    core: &[u8],
    is_v4: bool,
    with_udp: bool,
    random_ip_id: bool,
    checksum_used: bool,
) -> Result<V2CoFields, RohcParsingError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;
    let packet_type = V2PacketType::detect(first);
    let mut fields = V2CoFields::empty(packet_type);

    let mut at = match packet_type {
        V2PacketType::Pt0Crc3 => {
            fields.msn_lsbs = ((first >> 3) & 0x0F) as u16;
            fields.msn_bits = PT0_CRC3_MSN_BITS;
            fields.header_crc = first & 0x07;
            fields.header_crc_bits = 3;
            1
        }
        V2PacketType::Pt0Crc7 => {
            let second = *core.get(1).ok_or(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::Pt0Packet,
            })?;
            fields.msn_lsbs = (((first & 0x1F) as u16) << 1) | ((second >> 7) as u16);
            fields.msn_bits = PT0_CRC7_MSN_BITS;
            fields.header_crc = second & 0x7F;
            fields.header_crc_bits = 7;
            2
        }
        V2PacketType::Pt1SeqId => {
            let second = *core.get(1).ok_or(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::Pt1Packet,
            })?;
            fields.header_crc = (first >> 2) & 0x07;
            fields.header_crc_bits = 3;
            fields.msn_lsbs = (((first & 0x03) as u16) << 4) | ((second >> 4) as u16);
            fields.msn_bits = PT1_MSN_BITS;
            fields.ip_id_lsbs = Some((second & 0x0F) as u16);
            fields.ip_id_bits = PT1_IPID_BITS;
            2
        }
        V2PacketType::Pt2SeqId => {
            if core.len() < 3 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 3,
                    got: core.len(),
                    context: ParseContext::Pt2Packet,
                });
            }
            fields.ip_id_lsbs =
                Some((((first & 0x1F) as u16) << 1) | ((core[1] >> 7) as u16));
            fields.ip_id_bits = PT2_IPID_BITS;
            fields.header_crc = core[1] & 0x7F;
            fields.header_crc_bits = 7;
            fields.msn_lsbs = core[2] as u16;
            fields.msn_bits = PT2_MSN_BITS;
            3
        }
        V2PacketType::CoCommon => {
            if core.len() < 4 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 4,
                    got: core.len(),
                    context: ParseContext::CoCommonPacket,
                });
            }
            let ipid_ind = core[1] & 0x80 != 0;
            fields.header_crc = core[1] & 0x7F;
            fields.header_crc_bits = 7;
            let flags_ind = core[2] & 0x80 != 0;
            let ttl_ind = core[2] & 0x40 != 0;
            let tos_ind = core[2] & 0x20 != 0;
            fields.reorder_ratio = Some((core[2] >> 3) & 0x03);
            fields.control_crc = Some(core[2] & 0x07);
            fields.msn_lsbs = core[3] as u16;
            fields.msn_bits = CO_COMMON_MSN_BITS;
            let mut at = 4;
            let mut need = |n: usize, at: usize| -> Result<(), RohcParsingError> {
                if core.len() < at + n {
                    Err(RohcParsingError::NotEnoughData {
                        needed: at + n,
                        got: core.len(),
                        context: ParseContext::CoCommonPacket,
                    })
                } else {
                    Ok(())
                }
            };
            if flags_ind {
                need(1, at)?;
                fields.new_df = Some(core[at] & 0x04 != 0);
                fields.new_behavior = Some(IpIdBehavior::from_wire_code(core[at]));
                at += 1;
            }
            if tos_ind {
                need(1, at)?;
                fields.new_tos = Some(core[at]);
                at += 1;
            }
            if ttl_ind {
                need(1, at)?;
                fields.new_ttl = Some(core[at]);
                at += 1;
            }
            if ipid_ind {
                need(2, at)?;
                fields.new_ip_id = Some(u16::from_be_bytes([core[at], core[at + 1]]));
                at += 2;
            }
            at
        }
        V2PacketType::CoRepair => {
            if core.len() < 3 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 3,
                    got: core.len(),
                    context: ParseContext::CoRepairPacket,
                });
            }
            if core[1] & 0x80 != 0 || core[2] & 0xF8 != 0 {
                return Err(RohcParsingError::ReservedBitsSet {
                    context: ParseContext::CoRepairPacket,
                });
            }
            fields.header_crc = core[1] & 0x7F;
            fields.header_crc_bits = 7;
            fields.control_crc = Some(core[2] & 0x07);
            let (dynamic, dyn_len) = read_dynamic_chain(&core[3..], is_v4, with_udp)?;
            fields.msn_lsbs = dynamic.msn.value();
            fields.msn_bits = 16;
            fields.repair_fields = Some(dynamic);
            3 + dyn_len
        }
        V2PacketType::Ir | V2PacketType::Unknown(_) => {
            return Err(RohcParsingError::UnknownPacketType {
                discriminator: first,
                profile_id: None,
            });
        }
    };

    // Irregular chain: random IP-ID, then the UDP checksum. co_repair carries
    // the checksum inside its dynamic chain already. A co_common announcing a
    // behavior switch changes the irregular layout of its own packet.
    let random_now = match fields.new_behavior {
        Some(behavior) => behavior == IpIdBehavior::Random,
        None => random_ip_id,
    };
    let carries_irregular = packet_type != V2PacketType::CoRepair;
    if carries_irregular {
        if random_now && is_v4 {
            if core.len() < at + 2 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: at + 2,
                    got: core.len(),
                    context: ParseContext::IrregularChain,
                });
            }
            fields.rand_ip_id = Some(u16::from_be_bytes([core[at], core[at + 1]]));
            at += 2;
        }
        if checksum_used && with_udp {
            if core.len() < at + 2 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: at + 2,
                    got: core.len(),
                    context: ParseContext::IrregularChain,
                });
            }
            fields.udp_checksum = Some(u16::from_be_bytes([core[at], core[at + 1]]));
            at += 2;
        }
    }

    fields.consumed = at;
    Ok(fields)
}

/// Appends irregular fields behind a compressed base header.
pub fn write_irregular(
    rand_ip_id: Option<u16>,
    udp_checksum: Option<u16>,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = rand_ip_id.map_or(0, |_| 2) + udp_checksum.map_or(0, |_| 2);
    check_capacity(out, needed, ParseContext::IrregularChain)?;
    let mut at = 0;
    if let Some(ip_id) = rand_ip_id {
        out[at..at + 2].copy_from_slice(&ip_id.to_be_bytes());
        at += 2;
    }
    if let Some(checksum) = udp_checksum {
        out[at..at + 2].copy_from_slice(&checksum.to_be_bytes());
        at += 2;
    }
    Ok(at)
}
