//! `ProfileHandler` implementation for the ROHCv2 profiles.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use log::{debug, trace};

use crate::crc::CrcCalculators;
use crate::encodings::{decode_lsb, encode_lsb, p_for_sn};
use crate::error::{
    DecompressionError, Field, ParseContext, RohcBuildingError, RohcError, RohcParsingError,
};
use crate::feedback::{AckType, FeedbackUnit};
use crate::headers::{Ipv4Header, Ipv6Header, UdpHeader};
use crate::constants::{IPV4_MIN_HEADER_LENGTH, IPV6_HEADER_LENGTH, UDP_HEADER_LENGTH};
use crate::packet_defs::{DecompState, Features, IpIdBehavior, RohcProfile};
use crate::state_machine::CompressorState;
use crate::traits::{
    ClassifyEnv, CompressorProfileConfig, ProfileHandler, RohcCompressorContext,
    RohcDecompressorContext,
};
use crate::types::{ContextId, IpId, Msn};

use super::context::{V2CompressorContext, V2DecompressorContext, V2IpInfo, V2PacketView};
use super::packets::{
    control_crc3, parse_co, parse_ir, serialize_co_common, serialize_co_repair, serialize_ir,
    serialize_pt0_crc3, serialize_pt0_crc7, serialize_pt1, serialize_pt2, write_irregular,
    CoCommonOptions, V2CoFields, V2DynamicFields, V2PacketType, CO_COMMON_MSN_BITS,
    PT0_CRC3_MSN_BITS, PT0_CRC7_MSN_BITS, PT1_IPID_BITS, PT1_MSN_BITS, PT2_IPID_BITS,
    PT2_MSN_BITS,
};

/// Handler covering profiles 0x0102 (with UDP) and 0x0104 (IP-only).
#[derive(Debug)]
pub struct V2Handler {
    with_udp: bool,
    crc: CrcCalculators,
}

impl V2Handler {
    /// ROHCv2 IP/UDP profile (0x0102).
    pub fn ip_udp() -> Self {
        Self {
            with_udp: true,
            crc: CrcCalculators::new(),
        }
    }

    /// ROHCv2 IP-only profile (0x0104).
    pub fn ip_only() -> Self {
        Self {
            with_udp: false,
            crc: CrcCalculators::new(),
        }
    }

    fn compressible_view(&self, packet: &[u8], features: Features) -> Option<V2PacketView> {
        let view = V2PacketView::parse(packet, self.with_udp).ok()?;
        if let Some(ip) = &view.ip4 {
            if ip.more_fragments || ip.fragment_offset != 0 {
                return None;
            }
            if ip.total_length as usize != packet.len() {
                return None;
            }
            if !features.contains(Features::NO_IP_CHECKSUMS)
                && ip.checksum != ip.expected_checksum()
            {
                return None;
            }
        }
        if let Some(ip) = &view.ip6 {
            if ip.payload_length as usize != packet.len() - IPV6_HEADER_LENGTH {
                return None;
            }
        }
        if self.with_udp {
            let udp = view.udp.as_ref()?;
            let ip_len = if view.ip4.is_some() {
                IPV4_MIN_HEADER_LENGTH
            } else {
                IPV6_HEADER_LENGTH
            };
            if udp.length_or_coverage as usize != packet.len() - ip_len {
                return None;
            }
        }
        Some(view)
    }
}

impl ProfileHandler for V2Handler {
    fn profile_id(&self) -> RohcProfile {
        if self.with_udp {
            RohcProfile::V2Udp
        } else {
            RohcProfile::V2Ip
        }
    }

    fn matches(&self, packet: &[u8], env: &ClassifyEnv<'_>) -> bool {
        self.compressible_view(packet, env.features).is_some()
    }

    fn flow_signature(&self, packet: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        if let Ok(view) = V2PacketView::parse(packet, self.with_udp) {
            match view.ip_info() {
                V2IpInfo::V4 { src, dst, protocol } => {
                    src.hash(&mut hasher);
                    dst.hash(&mut hasher);
                    protocol.hash(&mut hasher);
                }
                V2IpInfo::V6 {
                    src,
                    dst,
                    next_header,
                    flow_label,
                } => {
                    src.hash(&mut hasher);
                    dst.hash(&mut hasher);
                    next_header.hash(&mut hasher);
                    flow_label.hash(&mut hasher);
                }
            }
            if let Some(udp) = &view.udp {
                udp.src_port.hash(&mut hasher);
                udp.dst_port.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorProfileConfig,
    ) -> Box<dyn RohcCompressorContext> {
        Box::new(V2CompressorContext::new(cid, self.with_udp, config))
    }

    fn create_decompressor_context(
        &self,
        cid: ContextId,
        features: Features,
    ) -> Box<dyn RohcDecompressorContext> {
        let mut context = V2DecompressorContext::new(cid, self.with_udp);
        context.features = features;
        Box::new(context)
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
            .downcast_mut::<V2CompressorContext>()
            .expect("context type bound to handler");
        let view = V2PacketView::parse(packet, self.with_udp)?;
        compress_packet(ctx, &view, packet, now, &self.crc, out)
    }

    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<V2DecompressorContext>()
            .expect("context type bound to handler");
        decompress_packet(ctx, core_packet, &self.crc, out)
    }

    fn handle_feedback(&self, context: &mut dyn RohcCompressorContext, feedback: &FeedbackUnit) {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<V2CompressorContext>()
            .expect("context type bound to handler");
        if let Some(mode) = feedback.mode {
            ctx.mode = mode;
        }
        match feedback.ack_type {
            AckType::Ack => {
                ctx.sm.on_ack();
                if let Some(msn) = feedback.usable_msn() {
                    ctx.msn_window.ack_to(Msn::new(msn));
                    ctx.ip_id_window.ack_to(Msn::new(msn));
                }
            }
            AckType::Nack => {
                ctx.sm.on_nack();
                // ROHCv2 repairs dynamic damage with co_repair.
                ctx.co_repair_pending = true;
            }
            AckType::StaticNack => ctx.sm.on_static_nack(),
        }
    }
}

/// CRC input for the header CRCs: the uncompressed header bytes followed by
/// the MSN and reorder ratio.
fn header_crc_input(header: &[u8], msn: Msn, reorder_ratio: u8) -> ([u8; 64], usize) {
    let mut input = [0u8; 64];
    debug_assert!(header.len() + 3 <= input.len());
    input[..header.len()].copy_from_slice(header);
    input[header.len()..header.len() + 2].copy_from_slice(&msn.value().to_be_bytes());
    input[header.len() + 2] = reorder_ratio & 0x03;
    (input, header.len() + 3)
}

fn ctrl_crc3_of(crc: &CrcCalculators, ctx_is_v4: bool, features: Features, reorder_ratio: u8, msn: Msn, behavior: IpIdBehavior) -> u8 {
    let behaviors: &[IpIdBehavior] = if ctx_is_v4 { &[behavior] } else { &[] };
    let ipv6_included = if !ctx_is_v4 && features.contains(Features::CRC3_COVERS_IPV6_BEHAVIOR) {
        1
    } else {
        0
    };
    control_crc3(crc, reorder_ratio, msn, behaviors, ipv6_included)
}

fn compress_packet(
    ctx: &mut V2CompressorContext,
    view: &V2PacketView,
    packet: &[u8],
    now: Instant,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    if !ctx.initialized {
        ctx.initialize_from(view);
    }
    let payload = &packet[view.header_len..];

    if let Some(udp) = &view.udp {
        let used = udp.checksum != 0;
        if used != ctx.checksum_used {
            ctx.checksum_used = used;
            ctx.sm.reset_to_ir();
        }
    }
    ctx.sm.refresh_due(now, ctx.features);

    let msn = ctx.msn.wrapping_add(1);

    // IP-ID behavior tracking (IPv4 only).
    let ip_id = view.ip4.as_ref().map(|ip| ip.identification).unwrap_or_default();
    let mut behavior_diverged = false;
    if ctx.is_v4() {
        let observed = IpIdBehavior::classify(ctx.last_ip_id.value(), ip_id.value(), 1);
        if observed != ctx.ip_id_behavior {
            ctx.ip_id_behavior = observed;
            behavior_diverged = true;
        }
    }

    let tos_changed = view.tos() != ctx.tos;
    let ttl_changed = view.ttl() != ctx.ttl;
    let df_now = view.ip4.as_ref().map(|ip| ip.dont_fragment).unwrap_or(false);
    let df_changed = df_now != ctx.df;

    let offset = ctx.ip_id_offset_of(ip_id, msn);
    let seq_ip_id = ctx.is_v4() && ctx.ip_id_behavior.is_sequential();
    let offset_unchanged = !seq_ip_id || offset == ctx.last_ip_id_offset;
    let ip_id_ok = !ctx.is_v4()
        || match ctx.ip_id_behavior {
            IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped => offset_unchanged,
            IpIdBehavior::Zero => ip_id == 0,
            IpIdBehavior::Random => true,
        };

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Choice {
        Ir,
        CoRepair,
        CoCommon,
        Pt0Crc3,
        Pt0Crc7,
        Pt1,
        Pt2,
    }

    let msn_u64 = msn.as_u64();
    let msn4 = ctx.msn_window.covers(msn_u64, PT0_CRC3_MSN_BITS, p_for_sn(PT0_CRC3_MSN_BITS));
    let msn6 = ctx.msn_window.covers(msn_u64, PT0_CRC7_MSN_BITS, p_for_sn(PT0_CRC7_MSN_BITS));
    let msn8 = ctx.msn_window.covers(msn_u64, CO_COMMON_MSN_BITS, p_for_sn(CO_COMMON_MSN_BITS));
    let quasi_changed = tos_changed || ttl_changed || df_changed || behavior_diverged;
    let so = ctx.sm.state() == CompressorState::So;

    let choice = if ctx.sm.state() == CompressorState::Ir {
        Choice::Ir
    } else if ctx.co_repair_pending {
        Choice::CoRepair
    } else if quasi_changed {
        if msn8 {
            Choice::CoCommon
        } else {
            Choice::Ir
        }
    } else if so && msn4 && ip_id_ok {
        Choice::Pt0Crc3
    } else if so && msn6 && ip_id_ok {
        Choice::Pt0Crc7
    } else if so
        && seq_ip_id
        && msn6
        && ctx.ip_id_window.covers(offset as u64, PT1_IPID_BITS, 0)
    {
        Choice::Pt1
    } else if so
        && seq_ip_id
        && msn8
        && ctx.ip_id_window.covers(offset as u64, PT2_IPID_BITS, 0)
    {
        Choice::Pt2
    } else if msn8 {
        Choice::CoCommon
    } else {
        Choice::Ir
    };

    let header_bytes = &packet[..view.header_len];
    let (crc_input, crc_input_len) = header_crc_input(header_bytes, msn, ctx.reorder_ratio);
    let header_crc3 = crc.crc3(&crc_input[..crc_input_len]);
    let header_crc7 = crc.crc7(&crc_input[..crc_input_len]);
    let ctrl3 = ctrl_crc3_of(
        crc,
        ctx.is_v4(),
        ctx.features,
        ctx.reorder_ratio,
        msn,
        ctx.ip_id_behavior,
    );

    let udp_checksum_now = view.udp.as_ref().map(|u| u.checksum);
    let dynamic = V2DynamicFields {
        tos: view.tos(),
        ttl: view.ttl(),
        df: df_now,
        reorder_ratio: ctx.reorder_ratio,
        ip_id_behavior: ctx.ip_id_behavior,
        ip_id,
        msn,
        udp_checksum: udp_checksum_now,
    };

    let mut header_len = match choice {
        Choice::Ir => serialize_ir(
            ctx.profile_id(),
            ctx.ip_info.as_ref().expect("initialized"),
            view.udp.as_ref().map(|u| (u.src_port, u.dst_port)),
            &dynamic,
            crc,
            out,
        )?,
        Choice::CoRepair => {
            serialize_co_repair(&dynamic, ctx.is_v4(), ctx.with_udp, header_crc7, ctrl3, out)?
        }
        Choice::CoCommon => {
            let options = CoCommonOptions {
                tos: tos_changed.then(|| view.tos()),
                ttl: ttl_changed.then(|| view.ttl()),
                flags: (df_changed || behavior_diverged)
                    .then_some((df_now, ctx.ip_id_behavior)),
                ip_id: (seq_ip_id && !offset_unchanged).then(|| ip_id.value()),
            };
            let msn_lsbs = encode_lsb(msn_u64, CO_COMMON_MSN_BITS)? as u8;
            serialize_co_common(msn_lsbs, header_crc7, ctrl3, ctx.reorder_ratio, &options, out)?
        }
        Choice::Pt0Crc3 => {
            let lsbs = encode_lsb(msn_u64, PT0_CRC3_MSN_BITS)? as u8;
            serialize_pt0_crc3(lsbs, header_crc3, out)?
        }
        Choice::Pt0Crc7 => {
            let lsbs = encode_lsb(msn_u64, PT0_CRC7_MSN_BITS)? as u8;
            serialize_pt0_crc7(lsbs, header_crc7, out)?
        }
        Choice::Pt1 => {
            let msn_lsbs = encode_lsb(msn_u64, PT1_MSN_BITS)? as u8;
            let offset_lsbs = encode_lsb(offset as u64, PT1_IPID_BITS)? as u8;
            serialize_pt1(msn_lsbs, offset_lsbs, header_crc3, out)?
        }
        Choice::Pt2 => {
            let msn_lsbs = encode_lsb(msn_u64, PT2_MSN_BITS)? as u8;
            let offset_lsbs = encode_lsb(offset as u64, PT2_IPID_BITS)? as u8;
            serialize_pt2(msn_lsbs, offset_lsbs, header_crc7, out)?
        }
    };

    // Irregular chain behind every compressed (non-IR, non-repair) packet.
    if !matches!(choice, Choice::Ir | Choice::CoRepair) {
        header_len += write_irregular(
            (ctx.is_v4() && ctx.ip_id_behavior == IpIdBehavior::Random)
                .then(|| ip_id.value()),
            (ctx.with_udp && ctx.checksum_used).then(|| udp_checksum_now.unwrap_or(0)),
            &mut out[header_len..],
        )?;
    }

    if out.len() < header_len + payload.len() {
        return Err(RohcBuildingError::BufferTooSmall {
            needed: header_len + payload.len(),
            available: out.len(),
            context: ParseContext::PacketInput,
        }
        .into());
    }
    out[header_len..header_len + payload.len()].copy_from_slice(payload);

    // Commit.
    match choice {
        Choice::Ir => ctx.sm.after_ir_sent(now),
        Choice::CoRepair => {
            ctx.co_repair_pending = false;
            ctx.sm.dynamic_fallback();
            ctx.sm.after_ir_sent(now);
        }
        Choice::CoCommon => {
            if quasi_changed {
                ctx.sm.dynamic_fallback();
            }
            ctx.sm.after_compressed_sent();
        }
        _ => ctx.sm.after_compressed_sent(),
    }
    ctx.tos = view.tos();
    ctx.ttl = view.ttl();
    ctx.df = df_now;
    ctx.msn = msn;
    ctx.msn_window.push(msn, msn_u64);
    if seq_ip_id {
        ctx.ip_id_window.push(msn, offset as u64);
    }
    ctx.last_ip_id = ip_id;
    ctx.last_ip_id_offset = offset;

    trace!("v2 profile chose {:?} in {:?}", choice, ctx.sm.state());
    Ok(header_len + payload.len())
}

fn decompress_packet(
    ctx: &mut V2DecompressorContext,
    core: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;

    match V2PacketType::detect(first) {
        V2PacketType::Ir => {
            let (info, ports, fields, consumed) =
                match parse_ir(core, ctx.with_udp, crc) {
                    Ok(parsed) => parsed,
                    Err(e @ RohcParsingError::CrcMismatch { .. }) => {
                        ctx.sm.on_crc_failure();
                        return Err(e.into());
                    }
                    Err(e) => return Err(e.into()),
                };
            ctx.ip_info = Some(info);
            if let Some((src, dst)) = ports {
                ctx.src_port = src;
                ctx.dst_port = dst;
            }
            apply_dynamic(ctx, &fields);
            ctx.checksum_used = fields.udp_checksum.is_some_and(|c| c != 0);
            ctx.sm.on_context_updated();
            debug!("v2 context {} initialized from IR", ctx.cid);
            let ip_id = ip_id_for(ctx, ctx.last_ip_id_offset, ctx.last_msn, fields.ip_id);
            rebuild(ctx, ip_id, fields.udp_checksum, &core[consumed..], out).map(|(len, _)| len)
        }
        V2PacketType::Unknown(byte) => Err(RohcParsingError::UnknownPacketType {
            discriminator: byte,
            profile_id: Some(ctx.profile_id().into()),
        }
        .into()),
        packet_type => {
            let fields = parse_co(
                core,
                ctx.is_v4(),
                ctx.with_udp,
                ctx.ip_id_behavior == IpIdBehavior::Random,
                ctx.checksum_used,
            )?;
            let allowed = match packet_type {
                V2PacketType::CoRepair | V2PacketType::CoCommon => {
                    ctx.sm.state() != DecompState::NoContext
                }
                _ => ctx.sm.state() == DecompState::FullContext,
            };
            if !allowed {
                return Err(DecompressionError::NotAllowedInState {
                    cid: ctx.cid,
                    packet_type: first,
                }
                .into());
            }
            decode_and_verify(ctx, &fields, &core[fields.consumed..], crc, out)
        }
    }
}

fn apply_dynamic(ctx: &mut V2DecompressorContext, fields: &V2DynamicFields) {
    ctx.tos = fields.tos;
    ctx.ttl = fields.ttl;
    ctx.df = fields.df;
    ctx.reorder_ratio = fields.reorder_ratio;
    ctx.ip_id_behavior = fields.ip_id_behavior;
    ctx.prev_msn = None;
    ctx.prev_ip_id_offset = None;
    ctx.last_msn = fields.msn;
    let effective = match fields.ip_id_behavior {
        IpIdBehavior::SequentialSwapped => fields.ip_id.swapped().value(),
        _ => fields.ip_id.value(),
    };
    ctx.last_ip_id_offset = effective.wrapping_sub(fields.msn.value());
}

fn ip_id_for(ctx: &V2DecompressorContext, offset: u16, msn: Msn, fallback: IpId) -> IpId {
    if !ctx.is_v4() {
        return IpId::new(0);
    }
    match ctx.ip_id_behavior {
        IpIdBehavior::Zero => IpId::new(0),
        IpIdBehavior::Random => fallback,
        _ => ctx.ip_id_from_offset(offset, msn),
    }
}

fn decode_and_verify(
    ctx: &mut V2DecompressorContext,
    fields: &V2CoFields,
    payload: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let mut last_mismatch: Option<(u8, u8)> = None;

    for attempt in 0..3 {
        let (msn_ref, offset_ref) = match attempt {
            0 | 1 => (ctx.last_msn, ctx.last_ip_id_offset),
            _ => match (ctx.prev_msn, ctx.prev_ip_id_offset) {
                (Some(msn), Some(offset)) => (msn, offset),
                _ => continue,
            },
        };

        // co_repair carries the full 16-bit MSN; the rest decode LSBs.
        let msn = if fields.msn_bits >= 16 {
            Msn::new(fields.msn_lsbs)
        } else {
            let k = fields.msn_bits;
            let mut value = decode_lsb(fields.msn_lsbs as u64, msn_ref.as_u64(), k, p_for_sn(k))
                .map_err(|_| DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::Msn,
                })? as u16;
            if attempt == 1 {
                value = value.wrapping_add(1u16.wrapping_shl(k as u32));
            }
            Msn::new(value)
        };

        // Candidate quasi-static values (co_common / co_repair updates).
        let repair = fields.repair_fields.as_ref();
        let behavior = repair
            .map(|r| r.ip_id_behavior)
            .or(fields.new_behavior)
            .unwrap_or(ctx.ip_id_behavior);
        let tos = repair.map(|r| r.tos).or(fields.new_tos).unwrap_or(ctx.tos);
        let ttl = repair.map(|r| r.ttl).or(fields.new_ttl).unwrap_or(ctx.ttl);
        let df = repair.map(|r| r.df).or(fields.new_df).unwrap_or(ctx.df);
        let reorder_ratio = repair
            .map(|r| r.reorder_ratio)
            .or(fields.reorder_ratio)
            .unwrap_or(ctx.reorder_ratio);

        // IP-ID candidate.
        let (ip_id, offset) = if !ctx.is_v4() {
            (IpId::new(0), 0)
        } else if let Some(r) = repair {
            let effective = match behavior {
                IpIdBehavior::SequentialSwapped => r.ip_id.swapped().value(),
                _ => r.ip_id.value(),
            };
            (r.ip_id, effective.wrapping_sub(msn.value()))
        } else {
            match behavior {
                IpIdBehavior::Zero => (IpId::new(0), offset_ref),
                IpIdBehavior::Random => {
                    (IpId::new(fields.rand_ip_id.unwrap_or(0)), offset_ref)
                }
                _ => {
                    if let Some(full) = fields.new_ip_id {
                        let ip_id = IpId::new(full);
                        let effective = match behavior {
                            IpIdBehavior::SequentialSwapped => ip_id.swapped().value(),
                            _ => full,
                        };
                        (ip_id, effective.wrapping_sub(msn.value()))
                    } else if let Some(lsbs) = fields.ip_id_lsbs {
                        let offset = decode_lsb(
                            lsbs as u64,
                            offset_ref as u64,
                            fields.ip_id_bits,
                            0,
                        )
                        .map_err(|_| DecompressionError::LsbDecodingFailed {
                            cid: ctx.cid,
                            field: Field::IpId,
                        })? as u16;
                        (ctx.ip_id_from_offset_with(behavior, offset, msn), offset)
                    } else {
                        (ctx.ip_id_from_offset_with(behavior, offset_ref, msn), offset_ref)
                    }
                }
            }
        };

        // Control CRC-3 covers decoded control fields.
        if let Some(carried) = fields.control_crc {
            let computed = ctrl_crc3_of(
                crc,
                ctx.is_v4(),
                ctx.features,
                reorder_ratio,
                msn,
                behavior,
            );
            if computed != carried {
                last_mismatch = Some((carried, computed));
                continue;
            }
        }

        // Rebuild the candidate and verify the header CRC over it.
        let udp_checksum = fields
            .repair_fields
            .as_ref()
            .and_then(|r| r.udp_checksum)
            .or(fields.udp_checksum);
        let candidate = CandidateState {
            ip_id,
            offset,
            tos,
            ttl,
            df,
        };
        let (total, header_len) =
            rebuild_candidate(ctx, &candidate, udp_checksum, payload, out)?;
        let (crc_input, crc_input_len) =
            header_crc_input(&out[..header_len], msn, reorder_ratio);
        let computed = match fields.header_crc_bits {
            3 => crc.crc3(&crc_input[..crc_input_len]),
            _ => crc.crc7(&crc_input[..crc_input_len]),
        };
        if computed == fields.header_crc {
            if attempt != 0 {
                debug!("v2 CRC repair succeeded on attempt {}", attempt);
            }
            ctx.tos = tos;
            ctx.ttl = ttl;
            ctx.df = df;
            ctx.ip_id_behavior = behavior;
            ctx.reorder_ratio = reorder_ratio;
            if let Some(r) = repair {
                ctx.checksum_used = r.udp_checksum.is_some_and(|c| c != 0);
            }
            ctx.commit(msn, candidate.offset);
            if fields.packet_type == V2PacketType::CoRepair {
                ctx.sm.on_context_updated();
            } else {
                ctx.sm.on_success();
            }
            return Ok(total);
        }
        last_mismatch = Some((fields.header_crc, computed));
        trace!("v2 CRC mismatch on attempt {}", attempt);
    }

    ctx.sm.on_crc_failure();
    let (expected, actual) = last_mismatch.unwrap_or((fields.header_crc, 0));
    Err(DecompressionError::CrcMismatch {
        cid: ctx.cid,
        expected,
        actual,
    }
    .into())
}

struct CandidateState {
    ip_id: IpId,
    offset: u16,
    tos: u8,
    ttl: u8,
    df: bool,
}

impl V2DecompressorContext {
    fn ip_id_from_offset_with(&self, behavior: IpIdBehavior, offset: u16, msn: Msn) -> IpId {
        let value = offset.wrapping_add(msn.value());
        match behavior {
            IpIdBehavior::SequentialSwapped => IpId::new(value.swap_bytes()),
            _ => IpId::new(value),
        }
    }
}

/// Rebuilds headers + payload; returns `(total_len, header_len)`.
fn rebuild_candidate(
    ctx: &V2DecompressorContext,
    candidate: &CandidateState,
    udp_checksum: Option<u16>,
    payload: &[u8],
    out: &mut [u8],
) -> Result<(usize, usize), RohcError> {
    let info = ctx
        .ip_info
        .as_ref()
        .ok_or(DecompressionError::ContextNotFound { cid: ctx.cid })?;
    let udp_len = if ctx.with_udp { UDP_HEADER_LENGTH } else { 0 };

    let (header_len, total) = match info {
        V2IpInfo::V4 { src, dst, protocol } => {
            let header_len = IPV4_MIN_HEADER_LENGTH + udp_len;
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
                tos: candidate.tos,
                total_length: total as u16,
                identification: candidate.ip_id,
                dont_fragment: candidate.df,
                more_fragments: false,
                fragment_offset: 0,
                ttl: candidate.ttl,
                protocol: *protocol,
                checksum: 0,
                src: *src,
                dst: *dst,
            };
            ip.build(out)?;
            (header_len, total)
        }
        V2IpInfo::V6 {
            src,
            dst,
            next_header,
            flow_label,
        } => {
            let header_len = IPV6_HEADER_LENGTH + udp_len;
            let total = header_len + payload.len();
            if out.len() < total {
                return Err(RohcBuildingError::BufferTooSmall {
                    needed: total,
                    available: out.len(),
                    context: ParseContext::PacketInput,
                }
                .into());
            }
            let ip = Ipv6Header {
                traffic_class: candidate.tos,
                flow_label: *flow_label,
                payload_length: (total - IPV6_HEADER_LENGTH) as u16,
                next_header: *next_header,
                hop_limit: candidate.ttl,
                src: *src,
                dst: *dst,
            };
            ip.build(out)?;
            (header_len, total)
        }
    };

    if ctx.with_udp {
        let udp = UdpHeader {
            src_port: ctx.src_port,
            dst_port: ctx.dst_port,
            length_or_coverage: (udp_len + payload.len()) as u16,
            checksum: udp_checksum.unwrap_or(0),
        };
        udp.build(&mut out[header_len - udp_len..])?;
    }
    out[header_len..total].copy_from_slice(payload);
    Ok((total, header_len))
}

/// IR-path rebuild reusing the candidate machinery.
fn rebuild(
    ctx: &V2DecompressorContext,
    ip_id: IpId,
    udp_checksum: Option<u16>,
    payload: &[u8],
    out: &mut [u8],
) -> Result<(usize, usize), RohcError> {
    let candidate = CandidateState {
        ip_id,
        offset: ctx.last_ip_id_offset,
        tos: ctx.tos,
        ttl: ctx.ttl,
        df: ctx.df,
    };
    rebuild_candidate(ctx, &candidate, udp_checksum, payload, out)
}
