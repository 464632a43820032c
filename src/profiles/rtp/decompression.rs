//! Decompression-side logic for the RTP profile.
//!
//! Every packet goes through the same pipeline: discriminate, parse into
//! staged bits, decode against context references, rebuild the candidate
//! uncompressed header, verify the CRC, and only then update the context.
//! On a CRC mismatch two corrections are tried from the same staged bits:
//! an SN wraparound (the candidate plus the interpretation window size) and
//! a rollback to the previous reference.

use log::{debug, trace};

use crate::constants::{
    IPV4_MIN_HEADER_LENGTH, IP_PROTOCOL_UDP, RTP_MIN_HEADER_LENGTH, UDP_HEADER_LENGTH,
};
use crate::crc::CrcCalculators;
use crate::encodings::{decode_lsb, p_for_sn, p_for_ts};
use crate::error::{
    DecompressionError, Field, ParseContext, RohcBuildingError, RohcError, RohcParsingError,
};
use crate::headers::{Ipv4Header, RtpHeader, UdpHeader};
use crate::packet_defs::{DecompState, IpIdBehavior};
use crate::types::{IpId, SequenceNumber, Timestamp};

use super::constants::EXT_TS_BITS;
use super::context::RtpDecompressorContext;
use super::packets::{
    parse_ir, parse_ir_dyn, parse_uo, uo_crc_input, DynamicChain, RtpPacketType, UoFields,
};

/// Decompresses one core packet into `out`, returning the rebuilt length.
pub fn decompress(
    ctx: &mut RtpDecompressorContext,
    core: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;
    let packet_type = RtpPacketType::detect(
        first,
        core.get(1).copied(),
        ctx.ip_id_behavior != IpIdBehavior::Random,
    );

    match packet_type {
        RtpPacketType::Ir => {
            let parsed = match parse_ir(core, crc) {
                Ok(parsed) => parsed,
                Err(e @ RohcParsingError::CrcMismatch { .. }) => {
                    ctx.sm.on_crc_failure();
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            ctx.ip_src = parsed.static_chain.ip_src;
            ctx.ip_dst = parsed.static_chain.ip_dst;
            ctx.udp_src_port = parsed.static_chain.udp_src_port;
            ctx.udp_dst_port = parsed.static_chain.udp_dst_port;
            ctx.ssrc = parsed.static_chain.ssrc;
            apply_dynamic_chain(ctx, &parsed.dynamic_chain);
            ctx.sm.on_context_updated();
            debug!("rtp context initialized from IR (SN {})", ctx.last_sn);
            rebuild(
                ctx,
                ctx.last_sn,
                ctx.last_ts,
                ctx.last_marker,
                ip_id_of_chain(&parsed.dynamic_chain),
                parsed.dynamic_chain.udp_checksum,
                &core[parsed.consumed..],
                out,
            )
        }
        RtpPacketType::IrDyn => {
            if ctx.sm.state() == DecompState::NoContext {
                return Err(DecompressionError::NotAllowedInState {
                    cid: ctx.cid,
                    packet_type: first,
                }
                .into());
            }
            let parsed = match parse_ir_dyn(core, crc) {
                Ok(parsed) => parsed,
                Err(e @ RohcParsingError::CrcMismatch { .. }) => {
                    ctx.sm.on_crc_failure();
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            apply_dynamic_chain(ctx, &parsed.dynamic_chain);
            ctx.sm.on_context_updated();
            rebuild(
                ctx,
                ctx.last_sn,
                ctx.last_ts,
                ctx.last_marker,
                ip_id_of_chain(&parsed.dynamic_chain),
                parsed.dynamic_chain.udp_checksum,
                &core[parsed.consumed..],
                out,
            )
        }
        RtpPacketType::Unknown(byte) => Err(RohcParsingError::UnknownPacketType {
            discriminator: byte,
            profile_id: Some(crate::packet_defs::RohcProfile::Rtp.into()),
        }
        .into()),
        _ => {
            // UO-1 and UOR-2 update the dynamic chain and are acceptable
            // from Static Context onward; UO-0 needs a full context.
            let allowed = match ctx.sm.state() {
                DecompState::FullContext => true,
                DecompState::StaticContext => packet_type != RtpPacketType::Uo0,
                DecompState::NoContext => false,
            };
            if !allowed {
                return Err(DecompressionError::NotAllowedInState {
                    cid: ctx.cid,
                    packet_type: first,
                }
                .into());
            }
            let fields = parse_uo(
                core,
                ctx.ip_id_behavior != IpIdBehavior::Random,
                ctx.ip_id_behavior == IpIdBehavior::Random,
                ctx.udp_checksum_present,
            )?;
            decode_and_verify(ctx, &fields, &core[fields.consumed..], crc, out)
        }
    }
}

fn ip_id_of_chain(chain: &DynamicChain) -> IpId {
    chain.ip_id
}

fn apply_dynamic_chain(ctx: &mut RtpDecompressorContext, chain: &DynamicChain) {
    ctx.tos = chain.tos;
    ctx.ttl = chain.ttl;
    ctx.df = chain.df;
    ctx.udp_checksum_present = chain.udp_checksum_present;
    ctx.rtp_padding = chain.rtp_padding;
    ctx.rtp_extension = chain.rtp_extension;
    ctx.rtp_payload_type = chain.rtp_payload_type;
    ctx.ip_id_behavior = chain.ip_id_behavior;

    ctx.prev_sn = None;
    ctx.prev_ts = None;
    ctx.prev_ip_id_offset = None;
    ctx.last_sn = chain.sn;
    ctx.last_ts = chain.ts;
    ctx.last_marker = chain.marker;
    let effective = match chain.ip_id_behavior {
        IpIdBehavior::SequentialSwapped => chain.ip_id.swapped().value(),
        _ => chain.ip_id.value(),
    };
    ctx.last_ip_id_offset = effective.wrapping_sub(chain.sn.value());

    ctx.ts_stride = chain.ts_stride;
    ctx.ts_scaled_mode = chain.ts_stride.is_some();
}

/// One decode attempt's reference set.
#[derive(Debug, Clone, Copy)]
enum Attempt {
    Normal,
    SnWrap,
    RefRollback,
}

fn decode_and_verify(
    ctx: &mut RtpDecompressorContext,
    fields: &UoFields,
    payload: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let mut last_mismatch: Option<(u8, u8)> = None;

    for attempt in [Attempt::Normal, Attempt::SnWrap, Attempt::RefRollback] {
        let Some(candidate) = decode_candidate(ctx, fields, attempt)? else {
            continue;
        };
        let (sn, ts, marker, ip_id) = candidate;

        let input = uo_crc_input(ctx.ssrc, sn, ts, marker, ip_id);
        let computed = match fields.crc_bits {
            3 => crc.crc3(&input),
            _ => crc.crc7(&input),
        };
        if computed == fields.crc {
            if !matches!(attempt, Attempt::Normal) {
                debug!("rtp CRC repair succeeded via {:?}", attempt);
            }
            let offset = effective_offset(ctx, ip_id, sn);
            ctx.commit(sn, ts, marker, offset);
            ctx.sm.on_success();
            let checksum = fields.irregular.udp_checksum.unwrap_or(0);
            return rebuild(ctx, sn, ts, marker, ip_id, checksum, payload, out);
        }
        last_mismatch = Some((fields.crc, computed));
        trace!("rtp CRC mismatch on {:?} attempt", attempt);
    }

    ctx.sm.on_crc_failure();
    let (expected, actual) = last_mismatch.unwrap_or((fields.crc, 0));
    Err(DecompressionError::CrcMismatch {
        cid: ctx.cid,
        expected,
        actual,
    }
    .into())
}

fn effective_offset(ctx: &RtpDecompressorContext, ip_id: IpId, sn: SequenceNumber) -> u16 {
    let effective = match ctx.ip_id_behavior {
        IpIdBehavior::SequentialSwapped => ip_id.swapped().value(),
        _ => ip_id.value(),
    };
    effective.wrapping_sub(sn.value())
}

/// Decodes one candidate `(sn, ts, marker, ip_id)` tuple from staged bits.
/// Returns `Ok(None)` when the attempt has no reference to fall back to.
fn decode_candidate(
    ctx: &RtpDecompressorContext,
    fields: &UoFields,
    attempt: Attempt,
) -> Result<Option<(SequenceNumber, Timestamp, bool, IpId)>, RohcError> {
    let (sn_ref, ts_ref, offset_ref) = match attempt {
        Attempt::Normal | Attempt::SnWrap => {
            (ctx.last_sn, ctx.last_ts, ctx.last_ip_id_offset)
        }
        Attempt::RefRollback => {
            let (Some(sn), Some(ts), Some(offset)) =
                (ctx.prev_sn, ctx.prev_ts, ctx.prev_ip_id_offset)
            else {
                return Ok(None);
            };
            (sn, ts, offset)
        }
    };

    let k = fields.sn_bits;
    let mut sn_value = decode_lsb(
        fields.sn_lsbs as u64,
        sn_ref.as_u64(),
        k,
        p_for_sn(k),
    )
    .map_err(|_| DecompressionError::LsbDecodingFailed {
        cid: ctx.cid,
        field: Field::SequenceNumber,
    })? as u16;
    if matches!(attempt, Attempt::SnWrap) {
        // Wraparound correction: the true value sits one interpretation
        // interval further.
        sn_value = sn_value.wrapping_add(1u16.wrapping_shl(k as u32));
    }
    let sn = SequenceNumber::new(sn_value);
    let sn_delta = sn.wrapping_sub(sn_ref);

    let ts = decode_ts(ctx, fields, ts_ref, sn_delta)?;
    let marker = fields.marker.unwrap_or(ctx.last_marker);

    let ip_id = match ctx.ip_id_behavior {
        IpIdBehavior::Zero => IpId::new(0),
        IpIdBehavior::Random => IpId::new(fields.irregular.rand_ip_id.unwrap_or(0)),
        IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped => {
            let offset = match fields.ip_id_lsbs {
                Some(lsbs) => decode_lsb(
                    lsbs as u64,
                    offset_ref as u64,
                    fields.ip_id_bits,
                    0,
                )
                .map_err(|_| DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::IpId,
                })? as u16,
                None => offset_ref,
            };
            let value = offset.wrapping_add(sn.value());
            match ctx.ip_id_behavior {
                IpIdBehavior::SequentialSwapped => IpId::new(value.swap_bytes()),
                _ => IpId::new(value),
            }
        }
    };

    Ok(Some((sn, ts, marker, ip_id)))
}

fn decode_ts(
    ctx: &RtpDecompressorContext,
    fields: &UoFields,
    ts_ref: Timestamp,
    sn_delta: u16,
) -> Result<Timestamp, RohcError> {
    // The SDVL extension always carries raw TS LSBs.
    if let Some(ext) = fields.ext_ts_lsbs {
        let decoded = decode_lsb(
            ext as u64,
            ts_ref.as_u64(),
            EXT_TS_BITS,
            p_for_ts(EXT_TS_BITS),
        )
        .map_err(|_| DecompressionError::LsbDecodingFailed {
            cid: ctx.cid,
            field: Field::Timestamp,
        })?;
        return Ok(Timestamp::new(decoded as u32));
    }

    match fields.ts_lsbs {
        Some(lsbs) => {
            if ctx.ts_scaled_mode {
                let stride = ctx.ts_stride.ok_or(DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::TsStride,
                })?;
                // Scaled space is ts / stride on both sides; the residue
                // below the stride is invariant and taken from the reference.
                let scaled_ref = ts_ref.value() / stride;
                let residue = ts_ref.value() % stride;
                let scaled = decode_lsb(
                    lsbs as u64,
                    scaled_ref as u64,
                    fields.ts_bits,
                    p_for_ts(fields.ts_bits),
                )
                .map_err(|_| DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::TsScaled,
                })? as u32;
                Ok(Timestamp::new(scaled.wrapping_mul(stride).wrapping_add(residue)))
            } else {
                let decoded = decode_lsb(
                    lsbs as u64,
                    ts_ref.as_u64(),
                    fields.ts_bits,
                    p_for_ts(fields.ts_bits),
                )
                .map_err(|_| DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::Timestamp,
                })?;
                Ok(Timestamp::new(decoded as u32))
            }
        }
        None => {
            // No TS bits: infer. In scaled mode the timestamp advances one
            // stride per sequence step; otherwise it is unchanged.
            if ctx.ts_scaled_mode {
                let stride = ctx.ts_stride.unwrap_or(0);
                Ok(ts_ref.wrapping_add(stride.wrapping_mul(sn_delta as u32)))
            } else {
                Ok(ts_ref)
            }
        }
    }
}

/// Writes the rebuilt IPv4 + UDP + RTP headers and payload into `out`.
#[allow(clippy::too_many_arguments)]
fn rebuild(
    ctx: &RtpDecompressorContext,
    sn: SequenceNumber,
    ts: Timestamp,
    marker: bool,
    ip_id: IpId,
    udp_checksum: u16,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let header_len = IPV4_MIN_HEADER_LENGTH + UDP_HEADER_LENGTH + RTP_MIN_HEADER_LENGTH;
    let total = header_len + payload.len();
    if out.len() < total {
        return Err(RohcBuildingError::BufferTooSmall {
            needed: total,
            available: out.len(),
            context: ParseContext::PacketInput,
        }
        .into());
    }

    let ip = Ipv4Header {
        tos: ctx.tos,
        total_length: total as u16,
        identification: ip_id,
        dont_fragment: ctx.df,
        more_fragments: false,
        fragment_offset: 0,
        ttl: ctx.ttl,
        protocol: IP_PROTOCOL_UDP,
        checksum: 0,
        src: ctx.ip_src,
        dst: ctx.ip_dst,
    };
    let udp = UdpHeader {
        src_port: ctx.udp_src_port,
        dst_port: ctx.udp_dst_port,
        length_or_coverage: (UDP_HEADER_LENGTH + RTP_MIN_HEADER_LENGTH + payload.len()) as u16,
        checksum: udp_checksum,
    };
    let rtp = RtpHeader {
        padding: ctx.rtp_padding,
        extension: ctx.rtp_extension,
        marker,
        payload_type: ctx.rtp_payload_type,
        sequence_number: sn,
        timestamp: ts,
        ssrc: ctx.ssrc,
        csrc: vec![],
    };

    let mut at = ip.build(out)?;
    at += udp.build(&mut out[at..])?;
    at += rtp.build(&mut out[at..])?;
    out[at..at + payload.len()].copy_from_slice(payload);
    Ok(at + payload.len())
}
