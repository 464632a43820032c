//! Wire formats of the RTP profile packet set.
//!
//! All layouts are fixed by the external standard; this module serializes and
//! parses them with explicit shift/mask work. The `10` and `110` spaces are
//! context-dependent: with an IPv4 non-random IP-ID in the context (zero
//! counts as non-random) the octet after the prefix carries a T bit choosing
//! the -TS / -ID variant, otherwise the full field belongs to the RTP
//! variant's timestamp bits.
//!
//! Irregular fields ride uncompressed behind every compressed base header in
//! a fixed order: SDVL TS extension (X = 1), then a random IP-ID, then the
//! UDP checksum when in use.

use std::net::Ipv4Addr;

use crate::constants::{PACKET_TYPE_IR, PACKET_TYPE_IR_DYN};
use crate::crc::CrcCalculators;
use crate::encodings::{sdvl_decode, sdvl_encode};
use crate::error::{CrcType, ParseContext, RohcBuildingError, RohcParsingError};
use crate::packet_defs::{IpIdBehavior, RohcProfile};
use crate::types::{IpId, SequenceNumber, Ssrc, Timestamp};

use super::constants::*;

/// Discriminated packet type of a core RTP-profile packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpPacketType {
    Ir,
    IrDyn,
    Uo0,
    Uo1Rtp,
    Uo1Ts,
    Uo1Id,
    Uor2Rtp,
    Uor2Ts,
    Uor2Id,
    Unknown(u8),
}

impl RtpPacketType {
    /// Classifies the first core octet. `non_rnd_ip_id` tells whether the
    /// context carries an IPv4 non-random IP-ID, which re-purposes the T bit.
    /// UOR-2 variants under a non-random IP-ID are resolved by the second
    /// octet, which the caller hands in as `second`.
    pub fn detect(first: u8, second: Option<u8>, non_rnd_ip_id: bool) -> RtpPacketType {
        if first == PACKET_TYPE_IR {
            RtpPacketType::Ir
        } else if first == PACKET_TYPE_IR_DYN {
            RtpPacketType::IrDyn
        } else if first & UO0_DISCRIMINATOR_MASK == 0 {
            RtpPacketType::Uo0
        } else if first & UO1_PREFIX_MASK == UO1_PREFIX {
            if non_rnd_ip_id {
                if first & UO1_T_BIT != 0 {
                    RtpPacketType::Uo1Ts
                } else {
                    RtpPacketType::Uo1Id
                }
            } else {
                RtpPacketType::Uo1Rtp
            }
        } else if first & UOR2_PREFIX_MASK == UOR2_PREFIX {
            if non_rnd_ip_id {
                match second {
                    Some(b) if b & UOR2_T_BIT != 0 => RtpPacketType::Uor2Ts,
                    Some(_) => RtpPacketType::Uor2Id,
                    None => RtpPacketType::Unknown(first),
                }
            } else {
                RtpPacketType::Uor2Rtp
            }
        } else {
            RtpPacketType::Unknown(first)
        }
    }

    /// True for IR and IR-DYN.
    pub fn is_ir(self) -> bool {
        matches!(self, RtpPacketType::Ir | RtpPacketType::IrDyn)
    }
}

/// Static chain contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticChain {
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub udp_src_port: u16,
    pub udp_dst_port: u16,
    pub ssrc: Ssrc,
}

/// Dynamic chain contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicChain {
    pub tos: u8,
    pub ttl: u8,
    pub ip_id: IpId,
    pub sn: SequenceNumber,
    pub ts: Timestamp,
    pub marker: bool,
    pub df: bool,
    pub udp_checksum_present: bool,
    pub rtp_padding: bool,
    pub rtp_extension: bool,
    pub ip_id_behavior: IpIdBehavior,
    pub rtp_payload_type: u8,
    pub udp_checksum: u16,
    pub ts_stride: Option<u32>,
}

/// A parsed IR packet: both chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrPacket {
    pub static_chain: StaticChain,
    pub dynamic_chain: DynamicChain,
    pub consumed: usize,
}

/// A parsed IR-DYN packet: dynamic chain only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrDynPacket {
    pub dynamic_chain: DynamicChain,
    pub consumed: usize,
}

fn write_static_chain(chain: &StaticChain, out: &mut [u8]) {
    out[0..4].copy_from_slice(&chain.ip_src.octets());
    out[4..8].copy_from_slice(&chain.ip_dst.octets());
    out[8..10].copy_from_slice(&chain.udp_src_port.to_be_bytes());
    out[10..12].copy_from_slice(&chain.udp_dst_port.to_be_bytes());
    out[12..16].copy_from_slice(&chain.ssrc.value().to_be_bytes());
}

fn read_static_chain(data: &[u8]) -> StaticChain {
    StaticChain {
        ip_src: Ipv4Addr::new(data[0], data[1], data[2], data[3]),
        ip_dst: Ipv4Addr::new(data[4], data[5], data[6], data[7]),
        udp_src_port: u16::from_be_bytes([data[8], data[9]]),
        udp_dst_port: u16::from_be_bytes([data[10], data[11]]),
        ssrc: Ssrc::new(u32::from_be_bytes([data[12], data[13], data[14], data[15]])),
    }
}

fn dynamic_chain_len(chain: &DynamicChain) -> usize {
    let stride_len = match chain.ts_stride {
        Some(stride) if stride < (1 << 7) => 1,
        Some(stride) if stride < (1 << 14) => 2,
        Some(stride) if stride < (1 << 21) => 3,
        Some(_) => 4,
        None => 0,
    };
    DYNAMIC_CHAIN_LEN + stride_len
}

fn write_dynamic_chain(chain: &DynamicChain, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    out[0] = chain.tos;
    out[1] = chain.ttl;
    out[2..4].copy_from_slice(&chain.ip_id.value().to_be_bytes());
    out[4..6].copy_from_slice(&chain.sn.value().to_be_bytes());
    out[6..10].copy_from_slice(&chain.ts.value().to_be_bytes());
    let mut flags = 0u8;
    if chain.marker {
        flags |= DYN_FLAG_MARKER;
    }
    if chain.df {
        flags |= DYN_FLAG_DF;
    }
    if chain.udp_checksum_present {
        flags |= DYN_FLAG_UDP_CHECKSUM;
    }
    if chain.rtp_padding {
        flags |= DYN_FLAG_RTP_PADDING;
    }
    if chain.rtp_extension {
        flags |= DYN_FLAG_RTP_EXTENSION;
    }
    if chain.ts_stride.is_some() {
        flags |= DYN_FLAG_TS_STRIDE;
    }
    out[10] = flags;
    out[11] = chain.ip_id_behavior.wire_code();
    out[12] = chain.rtp_payload_type & 0x7F;
    out[13..15].copy_from_slice(&chain.udp_checksum.to_be_bytes());
    let mut written = DYNAMIC_CHAIN_LEN;
    if let Some(stride) = chain.ts_stride {
        written += sdvl_encode(stride, &mut out[written..])?;
    }
    Ok(written)
}

fn read_dynamic_chain(data: &[u8]) -> Result<(DynamicChain, usize), RohcParsingError> {
    if data.len() < DYNAMIC_CHAIN_LEN {
        return Err(RohcParsingError::NotEnoughData {
            needed: DYNAMIC_CHAIN_LEN,
            got: data.len(),
            context: ParseContext::DynamicChain,
        });
    }
    let flags = data[10];
    let mut consumed = DYNAMIC_CHAIN_LEN;
    let ts_stride = if flags & DYN_FLAG_TS_STRIDE != 0 {
        let (stride, used) = sdvl_decode(&data[consumed..])?;
        consumed += used;
        Some(stride)
    } else {
        None
    };
    Ok((
        DynamicChain {
            tos: data[0],
            ttl: data[1],
            ip_id: IpId::new(u16::from_be_bytes([data[2], data[3]])),
            sn: SequenceNumber::new(u16::from_be_bytes([data[4], data[5]])),
            ts: Timestamp::new(u32::from_be_bytes([data[6], data[7], data[8], data[9]])),
            marker: flags & DYN_FLAG_MARKER != 0,
            df: flags & DYN_FLAG_DF != 0,
            udp_checksum_present: flags & DYN_FLAG_UDP_CHECKSUM != 0,
            rtp_padding: flags & DYN_FLAG_RTP_PADDING != 0,
            rtp_extension: flags & DYN_FLAG_RTP_EXTENSION != 0,
            ip_id_behavior: IpIdBehavior::from_wire_code(data[11]),
            rtp_payload_type: data[12] & 0x7F,
            udp_checksum: u16::from_be_bytes([data[13], data[14]]),
            ts_stride,
        },
        consumed,
    ))
}

/// Serializes an IR packet (type, profile, CRC-8, static + dynamic chains).
pub fn serialize_ir(
    static_chain: &StaticChain,
    dynamic_chain: &DynamicChain,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 3 + STATIC_CHAIN_LEN + dynamic_chain_len(dynamic_chain);
    if out.len() < needed {
        return Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context: ParseContext::IrPacket,
        });
    }
    out[0] = PACKET_TYPE_IR;
    out[1] = RohcProfile::Rtp.lsb_octet();
    out[2] = 0;
    write_static_chain(static_chain, &mut out[3..]);
    let dyn_len = write_dynamic_chain(dynamic_chain, &mut out[3 + STATIC_CHAIN_LEN..])?;
    let total = 3 + STATIC_CHAIN_LEN + dyn_len;
    out[2] = crc.crc8(&out[..total]);
    Ok(total)
}

/// Serializes an IR-DYN packet (type, profile, CRC-8, dynamic chain).
pub fn serialize_ir_dyn(
    dynamic_chain: &DynamicChain,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let needed = 3 + dynamic_chain_len(dynamic_chain);
    if out.len() < needed {
        return Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context: ParseContext::IrDynPacket,
        });
    }
    out[0] = PACKET_TYPE_IR_DYN;
    out[1] = RohcProfile::Rtp.lsb_octet();
    out[2] = 0;
    let dyn_len = write_dynamic_chain(dynamic_chain, &mut out[3..])?;
    let total = 3 + dyn_len;
    out[2] = crc.crc8(&out[..total]);
    Ok(total)
}

fn check_ir_crc(
    core: &[u8],
    total: usize,
    crc: &CrcCalculators,
) -> Result<(), RohcParsingError> {
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
pub fn parse_ir(core: &[u8], crc: &CrcCalculators) -> Result<IrPacket, RohcParsingError> {
    let min = 3 + STATIC_CHAIN_LEN + DYNAMIC_CHAIN_LEN;
    if core.len() < min {
        return Err(RohcParsingError::NotEnoughData {
            needed: min,
            got: core.len(),
            context: ParseContext::IrPacket,
        });
    }
    let static_chain = read_static_chain(&core[3..]);
    let (dynamic_chain, dyn_len) = read_dynamic_chain(&core[3 + STATIC_CHAIN_LEN..])?;
    let total = 3 + STATIC_CHAIN_LEN + dyn_len;
    check_ir_crc(core, total, crc)?;
    Ok(IrPacket {
        static_chain,
        dynamic_chain,
        consumed: total,
    })
}

/// Parses and CRC-checks an IR-DYN packet.
pub fn parse_ir_dyn(core: &[u8], crc: &CrcCalculators) -> Result<IrDynPacket, RohcParsingError> {
    let min = 3 + DYNAMIC_CHAIN_LEN;
    if core.len() < min {
        return Err(RohcParsingError::NotEnoughData {
            needed: min,
            got: core.len(),
            context: ParseContext::IrDynPacket,
        });
    }
    let (dynamic_chain, dyn_len) = read_dynamic_chain(&core[3..])?;
    let total = 3 + dyn_len;
    check_ir_crc(core, total, crc)?;
    Ok(IrDynPacket {
        dynamic_chain,
        consumed: total,
    })
}

/// Irregular fields appended behind compressed base headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrregularFields {
    /// Full IP-ID, present when the behavior is random.
    pub rand_ip_id: Option<u16>,
    /// UDP checksum, present when the flow uses one.
    pub udp_checksum: Option<u16>,
}

impl IrregularFields {
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
    ) -> Result<(IrregularFields, usize), RohcParsingError> {
        let needed = usize::from(random_ip_id) * 2 + usize::from(udp_checksum) * 2;
        if data.len() < needed {
            return Err(RohcParsingError::NotEnoughData {
                needed,
                got: data.len(),
                context: ParseContext::IrregularChain,
            });
        }
        let mut at = 0;
        let rand_ip_id = if random_ip_id {
            let v = u16::from_be_bytes([data[at], data[at + 1]]);
            at += 2;
            Some(v)
        } else {
            None
        };
        let udp_checksum = if udp_checksum {
            let v = u16::from_be_bytes([data[at], data[at + 1]]);
            at += 2;
            Some(v)
        } else {
            None
        };
        Ok((
            IrregularFields {
                rand_ip_id,
                udp_checksum,
            },
            at,
        ))
    }
}

/// Everything a compressed (non-IR) packet carries, staged for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UoFields {
    pub packet_type: RtpPacketType,
    pub sn_lsbs: u16,
    pub sn_bits: u8,
    /// TS bits in the space the context is in (scaled or raw).
    pub ts_lsbs: Option<u32>,
    pub ts_bits: u8,
    /// IP-ID offset bits.
    pub ip_id_lsbs: Option<u16>,
    pub ip_id_bits: u8,
    pub marker: Option<bool>,
    pub crc: u8,
    pub crc_bits: u8,
    /// Raw 16-bit TS LSBs from the SDVL extension on -ID variants.
    pub ext_ts_lsbs: Option<u32>,
    pub irregular: IrregularFields,
    pub consumed: usize,
}

/// Builds the CRC reference over the uncompressed fields a UO/UOR CRC covers.
pub fn uo_crc_input(
    ssrc: Ssrc,
    sn: SequenceNumber,
    ts: Timestamp,
    marker: bool,
    ip_id: IpId,
) -> [u8; UO_CRC_INPUT_LEN] {
    let mut input = [0u8; UO_CRC_INPUT_LEN];
    input[0..4].copy_from_slice(&ssrc.value().to_be_bytes());
    input[4..6].copy_from_slice(&sn.value().to_be_bytes());
    input[6..10].copy_from_slice(&ts.value().to_be_bytes());
    input[10] = marker as u8;
    input[11..13].copy_from_slice(&ip_id.value().to_be_bytes());
    input
}

fn ensure_capacity(
    out: &[u8],
    needed: usize,
    context: ParseContext,
) -> Result<(), RohcBuildingError> {
    if out.len() < needed {
        return Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context,
        });
    }
    Ok(())
}

/// Serializes a UO-0 packet.
pub fn serialize_uo0(
    sn_lsbs: u8,
    crc3: u8,
    irregular: &IrregularFields,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(sn_lsbs < (1 << UO0_SN_BITS) && crc3 <= 0x07);
    ensure_capacity(out, 1 + irregular.wire_len(), ParseContext::Uo0Packet)?;
    out[0] = (sn_lsbs << 3) | crc3;
    let irr = irregular.write(&mut out[1..]);
    Ok(1 + irr)
}

/// Serializes a UO-1-RTP packet (no IPv4 non-random IP-ID in the context).
pub fn serialize_uo1_rtp(
    ts_lsbs: u8,
    marker: bool,
    sn_lsbs: u8,
    crc3: u8,
    irregular: &IrregularFields,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(ts_lsbs < (1 << UO1_RTP_TS_BITS));
    ensure_capacity(out, 2 + irregular.wire_len(), ParseContext::Uo1Packet)?;
    out[0] = UO1_PREFIX | (ts_lsbs & 0x3F);
    out[1] = ((marker as u8) << 7) | ((sn_lsbs & 0x0F) << 3) | (crc3 & 0x07);
    let irr = irregular.write(&mut out[2..]);
    Ok(2 + irr)
}

/// Serializes a UO-1-TS packet (non-random IP-ID, T = 1).
pub fn serialize_uo1_ts(
    ts_lsbs: u8,
    marker: bool,
    sn_lsbs: u8,
    crc3: u8,
    irregular: &IrregularFields,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(ts_lsbs < (1 << UO1_TS_TS_BITS));
    ensure_capacity(out, 2 + irregular.wire_len(), ParseContext::Uo1Packet)?;
    out[0] = UO1_PREFIX | UO1_T_BIT | (ts_lsbs & 0x1F);
    out[1] = ((marker as u8) << 7) | ((sn_lsbs & 0x0F) << 3) | (crc3 & 0x07);
    let irr = irregular.write(&mut out[2..]);
    Ok(2 + irr)
}

/// Serializes a UO-1-ID packet (non-random IP-ID, T = 0). A TS change rides
/// as an SDVL extension flagged by X.
pub fn serialize_uo1_id(
    ip_id_lsbs: u8,
    sn_lsbs: u8,
    crc3: u8,
    ext_ts_lsbs: Option<u32>,
    irregular: &IrregularFields,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(ip_id_lsbs < (1 << UO1_ID_IPID_BITS));
    let ext_len = ext_ts_lsbs.map_or(0, |_| 3);
    ensure_capacity(out, 2 + ext_len + irregular.wire_len(), ParseContext::Uo1Packet)?;
    out[0] = UO1_PREFIX | (ip_id_lsbs & 0x1F);
    out[1] = ((ext_ts_lsbs.is_some() as u8) << 7) | ((sn_lsbs & 0x0F) << 3) | (crc3 & 0x07);
    let mut at = 2;
    if let Some(ts) = ext_ts_lsbs {
        debug_assert!(ts < (1 << EXT_TS_BITS));
        at += sdvl_encode(ts, &mut out[at..])?;
    }
    let irr = irregular.write(&mut out[at..]);
    Ok(at + irr)
}

/// Serializes a UOR-2 packet of any variant.
///
/// `field5` is TS bits 5..1 for the RTP/TS variants or the IP-ID offset LSBs
/// for the ID variant; `second_high_bit` is TS bit 0 (RTP variant) or the T
/// bit (non-random-IP-ID contexts).
pub fn serialize_uor2(
    field5: u8,
    second_high_bit: bool,
    marker: bool,
    sn_lsbs: u8,
    crc7: u8,
    ext_ts_lsbs: Option<u32>,
    irregular: &IrregularFields,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    debug_assert!(field5 < (1 << 5) && sn_lsbs < (1 << UOR2_SN_BITS) && crc7 <= 0x7F);
    let ext_len = ext_ts_lsbs.map_or(0, |_| 3);
    ensure_capacity(out, 3 + ext_len + irregular.wire_len(), ParseContext::Uor2Packet)?;
    out[0] = UOR2_PREFIX | (field5 & 0x1F);
    out[1] = ((second_high_bit as u8) << 7) | ((marker as u8) << 6) | (sn_lsbs & 0x3F);
    out[2] = ((ext_ts_lsbs.is_some() as u8) << 7) | (crc7 & 0x7F);
    let mut at = 3;
    if let Some(ts) = ext_ts_lsbs {
        debug_assert!(ts < (1 << EXT_TS_BITS));
        at += sdvl_encode(ts, &mut out[at..])?;
    }
    let irr = irregular.write(&mut out[at..]);
    Ok(at + irr)
}

/// Parses any compressed (non-IR) packet into staged fields.
///
/// `non_rnd_ip_id` selects the context-dependent interpretation of the `10`
/// and `110` spaces; `random_ip_id` / `udp_checksum` describe which irregular
/// fields follow the base header.
pub fn parse_uo(
    core: &[u8],
    non_rnd_ip_id: bool,
    random_ip_id: bool,
    udp_checksum: bool,
) -> Result<UoFields, RohcParsingError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;
    let packet_type = RtpPacketType::detect(first, core.get(1).copied(), non_rnd_ip_id);

    let mut fields = UoFields {
        packet_type,
        sn_lsbs: 0,
        sn_bits: 0,
        ts_lsbs: None,
        ts_bits: 0,
        ip_id_lsbs: None,
        ip_id_bits: 0,
        marker: None,
        crc: 0,
        crc_bits: 0,
        ext_ts_lsbs: None,
        irregular: IrregularFields::default(),
        consumed: 0,
    };

    let mut at = match packet_type {
        RtpPacketType::Uo0 => {
            fields.sn_lsbs = ((first >> 3) & 0x0F) as u16;
            fields.sn_bits = UO0_SN_BITS;
            fields.crc = first & 0x07;
            fields.crc_bits = 3;
            1
        }
        RtpPacketType::Uo1Rtp | RtpPacketType::Uo1Ts | RtpPacketType::Uo1Id => {
            let second = *core.get(1).ok_or(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::Uo1Packet,
            })?;
            fields.sn_lsbs = ((second >> 3) & 0x0F) as u16;
            fields.sn_bits = UO1_SN_BITS;
            fields.crc = second & 0x07;
            fields.crc_bits = 3;
            let mut at = 2;
            match packet_type {
                RtpPacketType::Uo1Rtp => {
                    fields.ts_lsbs = Some((first & 0x3F) as u32);
                    fields.ts_bits = UO1_RTP_TS_BITS;
                    fields.marker = Some(second & 0x80 != 0);
                }
                RtpPacketType::Uo1Ts => {
                    fields.ts_lsbs = Some((first & 0x1F) as u32);
                    fields.ts_bits = UO1_TS_TS_BITS;
                    fields.marker = Some(second & 0x80 != 0);
                }
                RtpPacketType::Uo1Id => {
                    fields.ip_id_lsbs = Some((first & 0x1F) as u16);
                    fields.ip_id_bits = UO1_ID_IPID_BITS;
                    if second & UO1_ID_X_BIT != 0 {
                        let (ts, used) = sdvl_decode(&core[at..])?;
                        fields.ext_ts_lsbs = Some(ts);
                        at += used;
                    }
                }
                _ => unreachable!(),
            }
            at
        }
        RtpPacketType::Uor2Rtp | RtpPacketType::Uor2Ts | RtpPacketType::Uor2Id => {
            if core.len() < 3 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 3,
                    got: core.len(),
                    context: ParseContext::Uor2Packet,
                });
            }
            let second = core[1];
            let third = core[2];
            fields.sn_lsbs = (second & 0x3F) as u16;
            fields.sn_bits = UOR2_SN_BITS;
            fields.marker = Some(second & UOR2_M_BIT != 0);
            fields.crc = third & 0x7F;
            fields.crc_bits = 7;
            let mut at = 3;
            match packet_type {
                RtpPacketType::Uor2Rtp => {
                    let ts6 = (((first & 0x1F) as u32) << 1) | ((second >> 7) as u32);
                    fields.ts_lsbs = Some(ts6);
                    fields.ts_bits = UOR2_TS_BITS;
                }
                RtpPacketType::Uor2Ts => {
                    fields.ts_lsbs = Some((first & 0x1F) as u32);
                    fields.ts_bits = UOR2_TS_TS_BITS;
                }
                RtpPacketType::Uor2Id => {
                    fields.ip_id_lsbs = Some((first & 0x1F) as u16);
                    fields.ip_id_bits = UOR2_IPID_BITS;
                }
                _ => unreachable!(),
            }
            if third & UOR2_X_BIT != 0 {
                let (ts, used) = sdvl_decode(&core[at..])?;
                fields.ext_ts_lsbs = Some(ts);
                at += used;
            }
            at
        }
        RtpPacketType::Ir | RtpPacketType::IrDyn => {
            return Err(RohcParsingError::UnknownPacketType {
                discriminator: first,
                profile_id: Some(RohcProfile::Rtp.into()),
            });
        }
        RtpPacketType::Unknown(byte) => {
            return Err(RohcParsingError::UnknownPacketType {
                discriminator: byte,
                profile_id: Some(RohcProfile::Rtp.into()),
            });
        }
    };

    let (irregular, irr_len) = IrregularFields::read(&core[at..], random_ip_id, udp_checksum)?;
    fields.irregular = irregular;
    at += irr_len;
    fields.consumed = at;
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_static() -> StaticChain {
        StaticChain {
            ip_src: "192.168.1.10".parse().unwrap(),
            ip_dst: "192.168.1.20".parse().unwrap(),
            udp_src_port: 5004,
            udp_dst_port: 5004,
            ssrc: Ssrc::new(0xDEADBEEF),
        }
    }

    fn sample_dynamic(ts_stride: Option<u32>) -> DynamicChain {
        DynamicChain {
            tos: 0,
            ttl: 64,
            ip_id: IpId::new(0x1234),
            sn: SequenceNumber::new(100),
            ts: Timestamp::new(16_000),
            marker: false,
            df: true,
            udp_checksum_present: false,
            rtp_padding: false,
            rtp_extension: false,
            ip_id_behavior: IpIdBehavior::Sequential,
            rtp_payload_type: 96,
            udp_checksum: 0,
            ts_stride,
        }
    }

    #[test]
    fn ir_round_trip() {
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 64];
        let len = serialize_ir(&sample_static(), &sample_dynamic(None), &crc, &mut buf).unwrap();
        assert_eq!(len, 3 + STATIC_CHAIN_LEN + DYNAMIC_CHAIN_LEN);
        assert_eq!(buf[0], PACKET_TYPE_IR);
        assert_eq!(buf[1], 0x01);

        let parsed = parse_ir(&buf[..len], &crc).unwrap();
        assert_eq!(parsed.static_chain, sample_static());
        assert_eq!(parsed.dynamic_chain, sample_dynamic(None));
        assert_eq!(parsed.consumed, len);
    }

    #[test]
    fn ir_with_ts_stride_round_trip() {
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 64];
        let len =
            serialize_ir(&sample_static(), &sample_dynamic(Some(160)), &crc, &mut buf).unwrap();
        let parsed = parse_ir(&buf[..len], &crc).unwrap();
        assert_eq!(parsed.dynamic_chain.ts_stride, Some(160));
    }

    #[test]
    fn ir_crc_corruption_detected() {
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 64];
        let len = serialize_ir(&sample_static(), &sample_dynamic(None), &crc, &mut buf).unwrap();
        buf[10] ^= 0x01;
        assert!(matches!(
            parse_ir(&buf[..len], &crc),
            Err(RohcParsingError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn ir_dyn_round_trip() {
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 64];
        let len = serialize_ir_dyn(&sample_dynamic(Some(160)), &crc, &mut buf).unwrap();
        assert_eq!(buf[0], PACKET_TYPE_IR_DYN);
        let parsed = parse_ir_dyn(&buf[..len], &crc).unwrap();
        assert_eq!(parsed.dynamic_chain, sample_dynamic(Some(160)));
    }

    #[test]
    fn uo0_round_trip() {
        let mut buf = [0u8; 8];
        let len = serialize_uo0(0x0A, 0x05, &IrregularFields::default(), &mut buf).unwrap();
        assert_eq!(len, 1);
        let fields = parse_uo(&buf[..len], false, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uo0);
        assert_eq!(fields.sn_lsbs, 0x0A);
        assert_eq!(fields.crc, 0x05);
        assert_eq!(fields.sn_bits, 4);
    }

    #[test]
    fn uo1_rtp_round_trip() {
        let mut buf = [0u8; 8];
        let len =
            serialize_uo1_rtp(0x2A, true, 0x0C, 0x03, &IrregularFields::default(), &mut buf)
                .unwrap();
        assert_eq!(len, 2);
        let fields = parse_uo(&buf[..len], false, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uo1Rtp);
        assert_eq!(fields.ts_lsbs, Some(0x2A));
        assert_eq!(fields.ts_bits, UO1_RTP_TS_BITS);
        assert_eq!(fields.marker, Some(true));
        assert_eq!(fields.sn_lsbs, 0x0C);
    }

    #[test]
    fn uo1_ts_and_id_disambiguated_by_t_bit() {
        let mut buf = [0u8; 16];
        let len =
            serialize_uo1_ts(0x15, false, 0x01, 0x02, &IrregularFields::default(), &mut buf)
                .unwrap();
        let fields = parse_uo(&buf[..len], true, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uo1Ts);
        assert_eq!(fields.ts_lsbs, Some(0x15));

        let len = serialize_uo1_id(0x11, 0x01, 0x02, None, &IrregularFields::default(), &mut buf)
            .unwrap();
        let fields = parse_uo(&buf[..len], true, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uo1Id);
        assert_eq!(fields.ip_id_lsbs, Some(0x11));
        assert_eq!(fields.ext_ts_lsbs, None);
    }

    #[test]
    fn uo1_id_with_sdvl_ts_extension() {
        let mut buf = [0u8; 16];
        let len = serialize_uo1_id(
            0x07,
            0x03,
            0x04,
            Some(0xABCD),
            &IrregularFields::default(),
            &mut buf,
        )
        .unwrap();
        let fields = parse_uo(&buf[..len], true, false, false).unwrap();
        assert_eq!(fields.ext_ts_lsbs, Some(0xABCD));
    }

    #[test]
    fn uor2_rtp_carries_six_ts_bits() {
        let mut buf = [0u8; 16];
        // TS six bits 0b101011: field5 = 0b10101, low bit -> second octet.
        let len = serialize_uor2(
            0b10101,
            true,
            false,
            0x2A,
            0x55,
            None,
            &IrregularFields::default(),
            &mut buf,
        )
        .unwrap();
        assert_eq!(len, 3);
        let fields = parse_uo(&buf[..len], false, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uor2Rtp);
        assert_eq!(fields.ts_lsbs, Some(0b101011));
        assert_eq!(fields.sn_lsbs, 0x2A);
        assert_eq!(fields.crc, 0x55);
        assert_eq!(fields.crc_bits, 7);
    }

    #[test]
    fn uor2_id_and_ts_disambiguated_by_t_bit() {
        let mut buf = [0u8; 16];
        // T = 1: UOR-2-TS.
        let len = serialize_uor2(
            0x1F,
            true,
            true,
            0x3F,
            0x7F,
            None,
            &IrregularFields::default(),
            &mut buf,
        )
        .unwrap();
        let fields = parse_uo(&buf[..len], true, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uor2Ts);
        assert_eq!(fields.marker, Some(true));

        // T = 0: UOR-2-ID with an SDVL TS extension.
        let len = serialize_uor2(
            0x05,
            false,
            false,
            0x01,
            0x11,
            Some(0x1234),
            &IrregularFields::default(),
            &mut buf,
        )
        .unwrap();
        let fields = parse_uo(&buf[..len], true, false, false).unwrap();
        assert_eq!(fields.packet_type, RtpPacketType::Uor2Id);
        assert_eq!(fields.ip_id_lsbs, Some(0x05));
        assert_eq!(fields.ext_ts_lsbs, Some(0x1234));
    }

    #[test]
    fn irregular_fields_round_trip() {
        let irregular = IrregularFields {
            rand_ip_id: Some(0xBEEF),
            udp_checksum: Some(0xCAFE),
        };
        let mut buf = [0u8; 8];
        let len = serialize_uo0(0x01, 0x02, &irregular, &mut buf).unwrap();
        assert_eq!(len, 5);
        let fields = parse_uo(&buf[..len], false, true, true).unwrap();
        assert_eq!(fields.irregular, irregular);
        assert_eq!(fields.consumed, 5);
    }

    #[test]
    fn truncated_packets_are_rejected() {
        assert!(parse_uo(&[], false, false, false).is_err());
        assert!(parse_uo(&[0x80], false, false, false).is_err());
        assert!(parse_uo(&[0xC0, 0x00], false, false, false).is_err());
        // UO-0 with a missing irregular checksum.
        assert!(parse_uo(&[0x08], false, false, true).is_err());
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        // 0xF0 is outside every assigned space for this profile.
        assert!(matches!(
            parse_uo(&[0xF0, 0, 0], false, false, false),
            Err(RohcParsingError::UnknownPacketType { .. })
        ));
    }
}
