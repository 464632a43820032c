//! Profile 0x0000: uncompressed passthrough.
//!
//! Two packet formats only. IR establishes the context and carries the whole
//! original packet as payload; Normal packets are the original packet behind
//! the CID framing. A packet whose first byte would collide with the reserved
//! ROHC type space (`111xxxxx`) is forced back into an IR so the decompressor
//! never misroutes it.

use std::any::Any;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use log::trace;

use crate::constants::{MAX_IR_COUNT, PACKET_TYPE_IR};
use crate::crc::CrcCalculators;
use crate::error::{
    CrcType, ParseContext, RohcBuildingError, RohcError, RohcParsingError,
};
use crate::feedback::{AckType, FeedbackUnit};
use crate::headers::Ipv4Header;
use crate::packet_defs::{DecompState, Features, RohcProfile};
use crate::traits::{
    ClassifyEnv, CompressorProfileConfig, ProfileHandler, RohcCompressorContext,
    RohcDecompressorContext,
};
use crate::types::{ContextId, Msn};

/// First-byte mask of the reserved ROHC packet type space. A Normal packet
/// must not start inside it (RFC 3095, Section 5.10.2 note).
const RESERVED_SPACE_MASK: u8 = 0b1110_0000;
const RESERVED_SPACE_VALUE: u8 = 0b1110_0000;

#[derive(Debug)]
struct UncompressedCompressorContext {
    cid: ContextId,
    ir_count: u32,
    packets_since_ir: u32,
    ir_refresh_interval: u32,
}

impl RohcCompressorContext for UncompressedCompressorContext {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Uncompressed
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

#[derive(Debug)]
struct UncompressedDecompressorContext {
    cid: ContextId,
    state: DecompState,
}

impl RohcDecompressorContext for UncompressedDecompressorContext {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Uncompressed
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
        self.state
    }
    fn ack_msn(&self) -> Option<Msn> {
        None
    }
}

/// Handler for the Uncompressed profile.
#[derive(Debug, Default)]
pub struct UncompressedHandler {
    crc: CrcCalculators,
}

impl UncompressedHandler {
    /// Creates the handler.
    pub fn new() -> Self {
        Self {
            crc: CrcCalculators::new(),
        }
    }
}

impl ProfileHandler for UncompressedHandler {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Uncompressed
    }

    fn matches(&self, _packet: &[u8], _env: &ClassifyEnv<'_>) -> bool {
        // Last resort: every packet has a home here.
        true
    }

    fn flow_signature(&self, packet: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        // Group by IP flow when the packet is IPv4; everything else shares
        // one passthrough flow.
        if let Ok(ip) = Ipv4Header::parse(packet) {
            ip.src.hash(&mut hasher);
            ip.dst.hash(&mut hasher);
            ip.protocol.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorProfileConfig,
    ) -> Box<dyn RohcCompressorContext> {
        Box::new(UncompressedCompressorContext {
            cid,
            ir_count: 0,
            packets_since_ir: 0,
            ir_refresh_interval: config.ir_refresh_interval,
        })
    }

    fn create_decompressor_context(
        &self,
        cid: ContextId,
        _features: Features,
    ) -> Box<dyn RohcDecompressorContext> {
        Box::new(UncompressedDecompressorContext {
            cid,
            state: DecompState::NoContext,
        })
    }

    fn compress(
        &self,
        context: &mut dyn RohcCompressorContext,
        packet: &[u8],
        _now: Instant,
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<UncompressedCompressorContext>()
            .expect("context type bound to handler");

        let first_byte_collides = packet
            .first()
            .is_some_and(|b| b & RESERVED_SPACE_MASK == RESERVED_SPACE_VALUE);
        let refresh_due =
            ctx.ir_refresh_interval > 0 && ctx.packets_since_ir >= ctx.ir_refresh_interval;
        let send_ir = ctx.ir_count < MAX_IR_COUNT || refresh_due || first_byte_collides;

        if send_ir {
            let needed = 3 + packet.len();
            if out.len() < needed {
                return Err(RohcBuildingError::BufferTooSmall {
                    needed,
                    available: out.len(),
                    context: ParseContext::IrPacket,
                }
                .into());
            }
            out[0] = PACKET_TYPE_IR;
            out[1] = RohcProfile::Uncompressed.lsb_octet();
            out[2] = 0;
            out[2] = self.crc.crc8(&out[..3]);
            out[3..3 + packet.len()].copy_from_slice(packet);
            ctx.ir_count += 1;
            ctx.packets_since_ir = 0;
            trace!("uncompressed IR on {}", ctx.cid);
            Ok(needed)
        } else {
            if out.len() < packet.len() {
                return Err(RohcBuildingError::BufferTooSmall {
                    needed: packet.len(),
                    available: out.len(),
                    context: ParseContext::NormalPacket,
                }
                .into());
            }
            out[..packet.len()].copy_from_slice(packet);
            ctx.packets_since_ir += 1;
            Ok(packet.len())
        }
    }

    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<UncompressedDecompressorContext>()
            .expect("context type bound to handler");

        let (payload, is_ir) = if core_packet.first() == Some(&PACKET_TYPE_IR) {
            if core_packet.len() < 3 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 3,
                    got: core_packet.len(),
                    context: ParseContext::IrPacket,
                }
                .into());
            }
            let header = [core_packet[0], core_packet[1], 0];
            let computed = self.crc.crc8(&header);
            if computed != core_packet[2] {
                return Err(RohcParsingError::CrcMismatch {
                    expected: core_packet[2],
                    calculated: computed,
                    crc_type: CrcType::Crc8,
                }
                .into());
            }
            (&core_packet[3..], true)
        } else {
            if ctx.state == DecompState::NoContext {
                // Engine guarantees IR-first, but guard anyway.
                return Err(RohcParsingError::UnknownPacketType {
                    discriminator: core_packet[0],
                    profile_id: Some(RohcProfile::Uncompressed.into()),
                }
                .into());
            }
            (core_packet, false)
        };

        if out.len() < payload.len() {
            return Err(RohcBuildingError::BufferTooSmall {
                needed: payload.len(),
                available: out.len(),
                context: ParseContext::NormalPacket,
            }
            .into());
        }
        out[..payload.len()].copy_from_slice(payload);
        if is_ir {
            ctx.state = DecompState::FullContext;
        }
        Ok(payload.len())
    }

    fn handle_feedback(&self, context: &mut dyn RohcCompressorContext, feedback: &FeedbackUnit) {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<UncompressedCompressorContext>()
            .expect("context type bound to handler");
        if feedback.ack_type == AckType::StaticNack {
            ctx.ir_count = 0;
        }
    }
}
