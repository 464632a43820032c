//! `ProfileHandler` implementation shared by the sequential-MSN profiles.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use log::{debug, trace};

use crate::constants::IPV4_MIN_HEADER_LENGTH;
use crate::crc::CrcCalculators;
use crate::encodings::{decode_lsb, encode_lsb, p_for_sn};
use crate::error::{
    DecompressionError, Field, ParseContext, RohcBuildingError, RohcError, RohcParsingError,
};
use crate::feedback::{AckType, FeedbackUnit};
use crate::headers::{EspHeader, Ipv4Header, UdpHeader};
use crate::packet_defs::{DecompState, Features, IpIdBehavior, RohcProfile};
use crate::state_machine::CompressorState;
use crate::traits::{
    ClassifyEnv, CompressorProfileConfig, ProfileHandler, RohcCompressorContext,
    RohcDecompressorContext,
};
use crate::types::{ContextId, IpId, Msn};

use super::context::{SeqCompressorContext, SeqDecompressorContext, SeqPacketView, Transport};
use super::packets::{
    parse_ir, parse_ir_dyn, parse_uo, seq_crc_input, serialize_ir, serialize_ir_dyn,
    serialize_uo0, serialize_uo1, serialize_uor2, SeqDynamicChain, SeqIrregular, SeqPacketType,
    SeqStaticChain, SeqUoFields, UO0_MSN_BITS, UO1_IPID_BITS, UO1_MSN_BITS, UOR2_MSN_BITS,
};

/// Handler covering profiles 0x0002, 0x0003, 0x0004 and 0x0008, selected by
/// the transport descriptor.
#[derive(Debug)]
pub struct SeqHandler {
    transport: Transport,
    crc: CrcCalculators,
}

impl SeqHandler {
    /// UDP/IP profile (0x0002).
    pub fn udp() -> Self {
        Self::with_transport(Transport::Udp)
    }

    /// ESP/IP profile (0x0003).
    pub fn esp() -> Self {
        Self::with_transport(Transport::Esp)
    }

    /// IP-only profile (0x0004).
    pub fn ip() -> Self {
        Self::with_transport(Transport::None)
    }

    /// UDP-Lite/IP profile (0x0008).
    pub fn udplite() -> Self {
        Self::with_transport(Transport::UdpLite)
    }

    fn with_transport(transport: Transport) -> Self {
        Self {
            transport,
            crc: CrcCalculators::new(),
        }
    }

    /// Inner protocols the IP-only profile takes: tunneled IP, ICMP and GRE.
    /// Unknown transports (SCTP and friends) fall through to Uncompressed.
    const IP_ONLY_PROTOCOLS: [u8; 4] = [1, 4, 41, 47];

    fn compressible_view(&self, packet: &[u8], features: Features) -> Option<SeqPacketView> {
        let view = SeqPacketView::parse(packet, self.transport).ok()?;
        if self.transport == Transport::None
            && !Self::IP_ONLY_PROTOCOLS.contains(&view.ip.protocol)
        {
            return None;
        }
        if view.ip.more_fragments || view.ip.fragment_offset != 0 {
            return None;
        }
        if view.ip.total_length as usize != packet.len() {
            return None;
        }
        if !features.contains(Features::NO_IP_CHECKSUMS)
            && view.ip.checksum != view.ip.expected_checksum()
        {
            return None;
        }
        if matches!(self.transport, Transport::Udp)
            && view.udp.as_ref().map(|u| u.length_or_coverage as usize)
                != Some(packet.len() - IPV4_MIN_HEADER_LENGTH)
        {
            return None;
        }
        if self.transport == Transport::UdpLite {
            // Coverage may not exceed the datagram.
            let coverage = view.udp.as_ref()?.length_or_coverage as usize;
            if coverage > packet.len() - IPV4_MIN_HEADER_LENGTH {
                return None;
            }
        }
        Some(view)
    }
}

impl ProfileHandler for SeqHandler {
    fn profile_id(&self) -> RohcProfile {
        self.transport.profile()
    }

    fn matches(&self, packet: &[u8], env: &ClassifyEnv<'_>) -> bool {
        self.compressible_view(packet, env.features).is_some()
    }

    fn flow_signature(&self, packet: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        if let Ok(view) = SeqPacketView::parse(packet, self.transport) {
            view.ip.src.hash(&mut hasher);
            view.ip.dst.hash(&mut hasher);
            view.ip.protocol.hash(&mut hasher);
            if let Some(udp) = &view.udp {
                udp.src_port.hash(&mut hasher);
                udp.dst_port.hash(&mut hasher);
            }
            if let Some(esp) = &view.esp {
                esp.spi.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorProfileConfig,
    ) -> Box<dyn RohcCompressorContext> {
        Box::new(SeqCompressorContext::new(cid, self.transport, config))
    }

    fn create_decompressor_context(
        &self,
        cid: ContextId,
        _features: Features,
    ) -> Box<dyn RohcDecompressorContext> {
        Box::new(SeqDecompressorContext::new(cid, self.transport))
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
            .downcast_mut::<SeqCompressorContext>()
            .expect("context type bound to handler");
        let view = SeqPacketView::parse(packet, self.transport)?;
        let payload = &packet[view.header_len..];
        compress_packet(ctx, &view, payload, now, &self.crc, out)
    }

    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<SeqDecompressorContext>()
            .expect("context type bound to handler");
        decompress_packet(ctx, core_packet, &self.crc, out)
    }

    fn handle_feedback(&self, context: &mut dyn RohcCompressorContext, feedback: &FeedbackUnit) {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<SeqCompressorContext>()
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
                ctx.ir_dyn_pending = true;
            }
            AckType::StaticNack => ctx.sm.on_static_nack(),
        }
    }
}

fn compress_packet(
    ctx: &mut SeqCompressorContext,
    view: &SeqPacketView,
    payload: &[u8],
    now: Instant,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    if !ctx.initialized {
        ctx.initialize_from(view);
    }

    // Advance the MSN: generated for most transports, dictated by ESP.
    let prev_msn = ctx.msn;
    let (msn, esp_jump) = match (&view.esp, ctx.transport) {
        (Some(esp), Transport::Esp) => {
            let msn = Msn::new(esp.sequence_number as u16);
            let expected = ctx.esp_sn.wrapping_add(1);
            (msn, esp.sequence_number != expected && ctx.sm.state() != CompressorState::Ir)
        }
        _ => (ctx.msn.wrapping_add(1), false),
    };

    // A UDP checksum behavior flip forces resynchronization.
    if let Some(udp) = &view.udp {
        let present = ctx.transport == Transport::UdpLite || udp.checksum != 0;
        if present != ctx.udp_checksum_present {
            ctx.udp_checksum_present = present;
            ctx.sm.reset_to_ir();
        }
    }

    ctx.sm.refresh_due(now, ctx.features);

    // IP-ID behavior tracking against the MSN distance.
    let msn_delta = msn.wrapping_sub(prev_msn);
    let observed = IpIdBehavior::classify(
        ctx.last_ip_id.value(),
        view.ip.identification.value(),
        msn_delta,
    );
    let behavior_diverged = observed != ctx.ip_id_behavior
        && !(ctx.ip_id_behavior == IpIdBehavior::Zero && observed == IpIdBehavior::Zero);
    if behavior_diverged {
        ctx.ip_id_behavior = observed;
    }

    let quasi_static_changed = view.ip.tos != ctx.tos
        || view.ip.ttl != ctx.ttl
        || view.ip.dont_fragment != ctx.df
        || (ctx.transport == Transport::UdpLite
            && view.udp.as_ref().map(|u| u.length_or_coverage) != Some(ctx.udplite_coverage));

    let offset = ctx.ip_id_offset_of(view.ip.identification, msn);
    let seq_ip_id = ctx.ip_id_behavior.is_sequential();
    let offset_unchanged = !seq_ip_id || offset == ctx.last_ip_id_offset;
    let ip_id_ok = match ctx.ip_id_behavior {
        IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped => offset_unchanged,
        IpIdBehavior::Zero => view.ip.identification == 0,
        IpIdBehavior::Random => true,
    };

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Choice {
        Ir,
        IrDyn,
        Uo0,
        Uo1,
        Uor2,
    }

    let choice = if ctx.sm.state() == CompressorState::Ir {
        Choice::Ir
    } else if quasi_static_changed || behavior_diverged || esp_jump || ctx.ir_dyn_pending {
        Choice::IrDyn
    } else {
        let msn_u64 = msn.as_u64();
        let msn4 = ctx.msn_window.covers(msn_u64, UO0_MSN_BITS, p_for_sn(UO0_MSN_BITS));
        let msn5 = ctx.msn_window.covers(msn_u64, UO1_MSN_BITS, p_for_sn(UO1_MSN_BITS));
        let so = ctx.sm.state() == CompressorState::So;
        if so && msn4 && ip_id_ok {
            Choice::Uo0
        } else if so
            && seq_ip_id
            && msn5
            && ctx.ip_id_window.covers(offset as u64, UO1_IPID_BITS, 0)
        {
            Choice::Uo1
        } else if msn5 && ip_id_ok {
            Choice::Uor2
        } else {
            Choice::IrDyn
        }
    };

    // Serialize.
    let esp_sn_now = view.esp.as_ref().map(|esp| esp.sequence_number);
    let irregular = SeqIrregular {
        rand_ip_id: (ctx.ip_id_behavior == IpIdBehavior::Random)
            .then(|| view.ip.identification.value()),
        udp_checksum: view
            .udp
            .as_ref()
            .filter(|_| ctx.udp_checksum_present)
            .map(|u| u.checksum),
    };
    let crc_input = seq_crc_input(
        ctx.transport.profile(),
        esp_sn_now.unwrap_or(msn.value() as u32),
        view.ip.identification,
        view.ip.tos,
        view.ip.ttl,
    );
    let crc3 = crc.crc3(&crc_input);
    let crc7 = crc.crc7(&crc_input);

    let dynamic_chain = SeqDynamicChain {
        tos: view.ip.tos,
        ttl: view.ip.ttl,
        ip_id: view.ip.identification,
        df: view.ip.dont_fragment,
        udp_checksum_present: ctx.udp_checksum_present,
        ip_id_behavior: ctx.ip_id_behavior,
        msn,
        esp_sn: esp_sn_now,
        coverage: (ctx.transport == Transport::UdpLite)
            .then(|| view.udp.as_ref().map_or(0, |u| u.length_or_coverage)),
        checksum: view.udp.as_ref().map(|u| u.checksum),
    };

    let header_len = match choice {
        Choice::Ir => {
            let static_chain = SeqStaticChain {
                ip_src: view.ip.src,
                ip_dst: view.ip.dst,
                protocol: view.ip.protocol,
                ports: view.udp.as_ref().map(|u| (u.src_port, u.dst_port)),
                spi: view.esp.as_ref().map(|e| e.spi),
            };
            serialize_ir(
                ctx.transport.profile(),
                ctx.transport,
                &static_chain,
                &dynamic_chain,
                crc,
                out,
            )?
        }
        Choice::IrDyn => serialize_ir_dyn(
            ctx.transport.profile(),
            ctx.transport,
            &dynamic_chain,
            crc,
            out,
        )?,
        Choice::Uo0 => {
            let lsbs = encode_lsb(msn.as_u64(), UO0_MSN_BITS)? as u8;
            serialize_uo0(lsbs, crc3, &irregular, out)?
        }
        Choice::Uo1 => {
            let offset_lsbs = encode_lsb(offset as u64, UO1_IPID_BITS)? as u8;
            let msn_lsbs = encode_lsb(msn.as_u64(), UO1_MSN_BITS)? as u8;
            serialize_uo1(offset_lsbs, msn_lsbs, crc3, &irregular, out)?
        }
        Choice::Uor2 => {
            let msn_lsbs = encode_lsb(msn.as_u64(), UOR2_MSN_BITS)? as u8;
            serialize_uor2(msn_lsbs, crc7, &irregular, out)?
        }
    };

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
        Choice::IrDyn => {
            ctx.ir_dyn_pending = false;
            ctx.sm.dynamic_fallback();
            ctx.sm.after_ir_sent(now);
        }
        _ => ctx.sm.after_compressed_sent(),
    }
    ctx.tos = view.ip.tos;
    ctx.ttl = view.ip.ttl;
    ctx.df = view.ip.dont_fragment;
    if ctx.transport == Transport::UdpLite {
        if let Some(udp) = &view.udp {
            ctx.udplite_coverage = udp.length_or_coverage;
        }
    }
    ctx.msn = msn;
    if let Some(esp_sn) = esp_sn_now {
        ctx.esp_sn = esp_sn;
    }
    ctx.msn_window.push(msn, msn.as_u64());
    if seq_ip_id {
        ctx.ip_id_window.push(msn, offset as u64);
    }
    ctx.last_ip_id = view.ip.identification;
    ctx.last_ip_id_offset = offset;

    trace!(
        "seq profile {:?} chose {:?} in {:?}",
        ctx.transport,
        choice,
        ctx.sm.state()
    );
    Ok(header_len + payload.len())
}

fn apply_chains(
    ctx: &mut SeqDecompressorContext,
    static_chain: Option<&SeqStaticChain>,
    dynamic_chain: &SeqDynamicChain,
) {
    if let Some(s) = static_chain {
        ctx.ip_src = s.ip_src;
        ctx.ip_dst = s.ip_dst;
        ctx.protocol = s.protocol;
        if let Some((src, dst)) = s.ports {
            ctx.src_port = src;
            ctx.dst_port = dst;
        }
        if let Some(spi) = s.spi {
            ctx.spi = spi;
        }
    }
    ctx.tos = dynamic_chain.tos;
    ctx.ttl = dynamic_chain.ttl;
    ctx.df = dynamic_chain.df;
    ctx.udp_checksum_present = dynamic_chain.udp_checksum_present;
    ctx.ip_id_behavior = dynamic_chain.ip_id_behavior;
    if let Some(coverage) = dynamic_chain.coverage {
        ctx.udplite_coverage = coverage;
    }
    ctx.prev_msn = None;
    ctx.prev_ip_id_offset = None;
    ctx.last_msn = dynamic_chain.msn;
    if let Some(esp_sn) = dynamic_chain.esp_sn {
        ctx.esp_sn = esp_sn;
    }
    let effective = match dynamic_chain.ip_id_behavior {
        IpIdBehavior::SequentialSwapped => dynamic_chain.ip_id.swapped().value(),
        _ => dynamic_chain.ip_id.value(),
    };
    ctx.last_ip_id_offset = effective.wrapping_sub(dynamic_chain.msn.value());
}

fn decompress_packet(
    ctx: &mut SeqDecompressorContext,
    core: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let first = *core.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::CorePacketAfterCid,
    })?;

    match SeqPacketType::detect(first) {
        SeqPacketType::Ir => {
            let (static_chain, dynamic_chain, consumed) =
                match parse_ir(core, ctx.transport, crc) {
                    Ok(parsed) => parsed,
                    Err(e @ RohcParsingError::CrcMismatch { .. }) => {
                        ctx.sm.on_crc_failure();
                        return Err(e.into());
                    }
                    Err(e) => return Err(e.into()),
                };
            apply_chains(ctx, Some(&static_chain), &dynamic_chain);
            ctx.sm.on_context_updated();
            debug!("seq context {} initialized from IR", ctx.cid);
            rebuild(ctx, ctx.last_msn, ip_id_of(ctx, &dynamic_chain), dynamic_chain.checksum, &core[consumed..], out)
        }
        SeqPacketType::IrDyn => {
            if ctx.sm.state() == DecompState::NoContext {
                return Err(DecompressionError::NotAllowedInState {
                    cid: ctx.cid,
                    packet_type: first,
                }
                .into());
            }
            let (dynamic_chain, consumed) = match parse_ir_dyn(core, ctx.transport, crc) {
                Ok(parsed) => parsed,
                Err(e @ RohcParsingError::CrcMismatch { .. }) => {
                    ctx.sm.on_crc_failure();
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            apply_chains(ctx, None, &dynamic_chain);
            ctx.sm.on_context_updated();
            rebuild(ctx, ctx.last_msn, ip_id_of(ctx, &dynamic_chain), dynamic_chain.checksum, &core[consumed..], out)
        }
        SeqPacketType::Unknown(byte) => Err(RohcParsingError::UnknownPacketType {
            discriminator: byte,
            profile_id: Some(ctx.transport.profile().into()),
        }
        .into()),
        packet_type => {
            // UO-1 and UOR-2 update the dynamic chain and are acceptable
            // from Static Context onward; UO-0 needs a full context.
            let allowed = match ctx.sm.state() {
                DecompState::FullContext => true,
                DecompState::StaticContext => packet_type != SeqPacketType::Uo0,
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
                ctx.ip_id_behavior == IpIdBehavior::Random,
                ctx.udp_checksum_present && ctx.transport != Transport::Esp
                    && ctx.transport != Transport::None,
            )?;
            decode_and_verify(ctx, &fields, &core[fields.consumed..], crc, out)
        }
    }
}

fn ip_id_of(ctx: &SeqDecompressorContext, chain: &SeqDynamicChain) -> IpId {
    let _ = ctx;
    chain.ip_id
}

fn decode_and_verify(
    ctx: &mut SeqDecompressorContext,
    fields: &SeqUoFields,
    payload: &[u8],
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let mut last_mismatch: Option<(u8, u8)> = None;

    // Attempt order: normal decode, MSN wraparound, reference rollback.
    for attempt in 0..3 {
        let (msn_ref, offset_ref) = match attempt {
            0 | 1 => (ctx.last_msn, ctx.last_ip_id_offset),
            _ => match (ctx.prev_msn, ctx.prev_ip_id_offset) {
                (Some(msn), Some(offset)) => (msn, offset),
                _ => continue,
            },
        };

        let k = fields.msn_bits;
        let mut msn_value = decode_lsb(
            fields.msn_lsbs as u64,
            msn_ref.as_u64(),
            k,
            p_for_sn(k),
        )
        .map_err(|_| DecompressionError::LsbDecodingFailed {
            cid: ctx.cid,
            field: Field::Msn,
        })? as u16;
        if attempt == 1 {
            msn_value = msn_value.wrapping_add(1u16.wrapping_shl(k as u32));
        }
        let msn = Msn::new(msn_value);

        let offset = match fields.ip_id_lsbs {
            Some(lsbs) => decode_lsb(lsbs as u64, offset_ref as u64, fields.ip_id_bits, 0)
                .map_err(|_| DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::IpId,
                })? as u16,
            None => offset_ref,
        };

        let ip_id = match ctx.ip_id_behavior {
            IpIdBehavior::Zero => IpId::new(0),
            IpIdBehavior::Random => IpId::new(fields.irregular.rand_ip_id.unwrap_or(0)),
            _ => ctx.ip_id_from_offset(offset, msn),
        };

        let full_sn = match ctx.transport {
            Transport::Esp => ctx.esp_sn_from_msn(msn),
            _ => msn.value() as u32,
        };
        let input = seq_crc_input(ctx.transport.profile(), full_sn, ip_id, ctx.tos, ctx.ttl);
        let computed = match fields.crc_bits {
            3 => crc.crc3(&input),
            _ => crc.crc7(&input),
        };
        if computed == fields.crc {
            if attempt != 0 {
                debug!("seq CRC repair succeeded on attempt {}", attempt);
            }
            let commit_offset = match ctx.ip_id_behavior {
                IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped => offset,
                _ => ctx.last_ip_id_offset,
            };
            ctx.commit(msn, commit_offset);
            ctx.sm.on_success();
            return rebuild(ctx, msn, ip_id, fields.irregular.udp_checksum, payload, out);
        }
        last_mismatch = Some((fields.crc, computed));
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

fn rebuild(
    ctx: &SeqDecompressorContext,
    msn: Msn,
    ip_id: IpId,
    udp_checksum: Option<u16>,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let transport_len = ctx.transport.header_len();
    let total = IPV4_MIN_HEADER_LENGTH + transport_len + payload.len();
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
        protocol: ctx.protocol,
        checksum: 0,
        src: ctx.ip_src,
        dst: ctx.ip_dst,
    };
    let mut at = ip.build(out)?;

    match ctx.transport {
        Transport::None => {}
        Transport::Udp => {
            let udp = UdpHeader {
                src_port: ctx.src_port,
                dst_port: ctx.dst_port,
                length_or_coverage: (transport_len + payload.len()) as u16,
                checksum: udp_checksum.unwrap_or(0),
            };
            at += udp.build(&mut out[at..])?;
        }
        Transport::UdpLite => {
            let udp = UdpHeader {
                src_port: ctx.src_port,
                dst_port: ctx.dst_port,
                length_or_coverage: ctx.udplite_coverage,
                checksum: udp_checksum.unwrap_or(0),
            };
            at += udp.build(&mut out[at..])?;
        }
        Transport::Esp => {
            let esp = EspHeader {
                spi: ctx.spi,
                sequence_number: ctx.esp_sn_from_msn(msn),
            };
            at += esp.build(&mut out[at..])?;
        }
    }

    out[at..at + payload.len()].copy_from_slice(payload);
    Ok(at + payload.len())
}
