//! The ROHC decompressor engine.
//!
//! Strips CID framing, detects the packet family from the first core octet,
//! dispatches to the owning profile handler and queues feedback for the peer
//! compressor according to the operating mode. Context updates happen inside
//! the profiles and only after CRC success; a rejected packet leaves the
//! context exactly as it was.

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::constants::{
    ADD_CID_PREFIX, ADD_CID_PREFIX_MASK, FEEDBACK_PREFIX, FEEDBACK_PREFIX_MASK, PACKET_TYPE_IR,
    SEGMENT_PREFIX, SEGMENT_PREFIX_MASK, SMALL_CID_MASK,
};
use crate::context_manager::ContextTable;
use crate::crc::CrcCalculators;
use crate::encodings::sdvl_decode;
use crate::error::{
    DecompressionError, EngineError, ParseContext, RohcError, RohcParsingError, RohcStatus,
};
use crate::feedback::{build_feedback2, wrap_feedback, AckType};
use crate::packet_defs::{CidType, DecompState, Features, OperMode, RohcProfile};
use crate::profiles::default_handlers;
use crate::traits::{ProfileHandler, RohcDecompressorContext};
use crate::types::ContextId;

/// Default enabled set, mirroring the compressor side.
const DEFAULT_ENABLED: [RohcProfile; 6] = [
    RohcProfile::Rtp,
    RohcProfile::Udp,
    RohcProfile::Esp,
    RohcProfile::UdpLite,
    RohcProfile::Ip,
    RohcProfile::Uncompressed,
];

/// The decompressor side of a ROHC channel.
pub struct Decompressor {
    cid_type: CidType,
    handlers: Vec<Box<dyn ProfileHandler>>,
    enabled: Vec<RohcProfile>,
    contexts: ContextTable<dyn RohcDecompressorContext>,
    mode: OperMode,
    features: Features,
    feedback_queue: VecDeque<Vec<u8>>,
    crc: CrcCalculators,
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("cid_type", &self.cid_type)
            .field("mode", &self.mode)
            .field("contexts", &self.contexts.len())
            .field("queued_feedback", &self.feedback_queue.len())
            .finish()
    }
}

impl Decompressor {
    /// Creates a decompressor for up to `max_contexts` concurrent flows,
    /// operating in `mode`.
    ///
    /// # Errors
    /// - [`EngineError::InvalidConfiguration`] - `max_contexts` is zero or
    ///   exceeds the CID space of `cid_type`
    pub fn new(
        cid_type: CidType,
        max_contexts: usize,
        mode: OperMode,
    ) -> Result<Self, EngineError> {
        if max_contexts == 0 {
            return Err(EngineError::InvalidConfiguration {
                reason: "max_contexts must be at least 1",
            });
        }
        if max_contexts > cid_type.max_cid() as usize + 1 {
            return Err(EngineError::InvalidConfiguration {
                reason: "max_contexts exceeds the CID space",
            });
        }
        Ok(Self {
            cid_type,
            handlers: default_handlers(),
            enabled: DEFAULT_ENABLED.to_vec(),
            contexts: ContextTable::with_capacity(max_contexts),
            mode,
            features: Features::NONE,
            feedback_queue: VecDeque::new(),
            crc: CrcCalculators::new(),
        })
    }

    /// Replaces the enabled-profile set.
    ///
    /// # Errors
    /// - [`EngineError::ProfileHandlerNotRegistered`] - unknown profile
    /// - [`EngineError::ProfileOctetConflict`] - ambiguous IR profile octets
    pub fn enable_profiles(&mut self, profiles: &[RohcProfile]) -> Result<(), EngineError> {
        crate::compressor::validate_profile_set(&self.handlers, profiles)?;
        self.enabled = profiles.to_vec();
        Ok(())
    }

    /// Sets the engine feature flags.
    pub fn set_features(&mut self, features: Features) {
        self.features = features;
    }

    /// Number of live decompression contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Pops the next queued feedback element (already wrapped for transport),
    /// if any. The decompressor queues feedback in O and R modes only.
    pub fn emit_feedback(&mut self) -> Option<Vec<u8>> {
        self.feedback_queue.pop_front()
    }

    /// Decompresses one ROHC packet into `out`, returning the rebuilt
    /// uncompressed packet length.
    ///
    /// # Errors
    /// - [`RohcParsingError::SegmentNotSupported`] - segment packet
    /// - [`DecompressionError::ContextNotFound`] - non-IR packet on unknown CID
    /// - [`DecompressionError::CrcMismatch`] - CRC failure after repair
    /// - parse errors for malformed packets
    pub fn decompress(&mut self, rohc: &[u8], out: &mut [u8]) -> Result<usize, RohcError> {
        if rohc.is_empty() {
            return Err(RohcParsingError::NotEnoughData {
                needed: 1,
                got: 0,
                context: ParseContext::PacketInput,
            }
            .into());
        }
        if rohc[0] & SEGMENT_PREFIX_MASK == SEGMENT_PREFIX {
            return Err(RohcParsingError::SegmentNotSupported.into());
        }
        if rohc[0] & FEEDBACK_PREFIX_MASK == FEEDBACK_PREFIX {
            // Feedback belongs to the co-located compressor, not here.
            return Err(RohcParsingError::UnknownPacketType {
                discriminator: rohc[0],
                profile_id: None,
            }
            .into());
        }

        let (cid, core_storage);
        let core: &[u8] = match self.cid_type {
            CidType::Small => {
                if rohc[0] & ADD_CID_PREFIX_MASK == ADD_CID_PREFIX {
                    cid = ContextId::new((rohc[0] & SMALL_CID_MASK) as u16);
                    &rohc[1..]
                } else {
                    cid = ContextId::new(0);
                    rohc
                }
            }
            CidType::Large => {
                // Large CIDs ride after the first core octet.
                if rohc.len() < 2 {
                    return Err(RohcParsingError::NotEnoughData {
                        needed: 2,
                        got: rohc.len(),
                        context: ParseContext::CidParsing,
                    }
                    .into());
                }
                let (cid_value, consumed) = sdvl_decode(&rohc[1..])?;
                cid = ContextId::new(cid_value as u16);
                let mut assembled = Vec::with_capacity(rohc.len() - consumed);
                assembled.push(rohc[0]);
                assembled.extend_from_slice(&rohc[1 + consumed..]);
                core_storage = assembled;
                &core_storage
            }
        };
        if core.is_empty() {
            return Err(RohcParsingError::NotEnoughData {
                needed: 1,
                got: 0,
                context: ParseContext::CorePacketAfterCid,
            }
            .into());
        }
        if cid.value() as usize >= self.contexts.capacity() {
            return Err(RohcParsingError::InvalidFieldValue {
                field: crate::error::Field::Cid,
                expected: self.contexts.capacity() as u32 - 1,
                got: cid.value() as u32,
            }
            .into());
        }

        if self.features.contains(Features::DUMP_PACKETS) {
            debug!("{} in: {:02x?}", cid, core);
        }
        let known_context = self.contexts.get(cid).is_some();
        let result = if known_context {
            self.dispatch_existing(cid, core, out)
        } else {
            self.dispatch_new(cid, core, out)
        };

        self.queue_feedback_for(cid, &result);
        result
    }

    fn dispatch_existing(
        &mut self,
        cid: ContextId,
        core: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let profile = self
            .contexts
            .get(cid)
            .expect("caller checked context presence")
            .profile_id();
        let handler = self
            .handlers
            .iter()
            .find(|h| h.profile_id() == profile)
            .ok_or(EngineError::ProfileHandlerNotRegistered { profile })?;
        let context = self
            .contexts
            .get_mut(cid)
            .expect("caller checked context presence");
        handler.decompress(context, core, out)
    }

    fn dispatch_new(
        &mut self,
        cid: ContextId,
        core: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        if core[0] != PACKET_TYPE_IR {
            debug!("non-IR packet {:#04x} on unknown {}", core[0], cid);
            return Err(DecompressionError::ContextNotFound { cid }.into());
        }
        if core.len() < 2 {
            return Err(RohcParsingError::NotEnoughData {
                needed: 2,
                got: core.len(),
                context: ParseContext::ProfileIdPeek,
            }
            .into());
        }
        let profile = RohcProfile::from_lsb_octet(core[1], &self.enabled)
            .ok_or(RohcParsingError::InvalidProfileId(core[1]))?;
        let handler = self
            .handlers
            .iter()
            .find(|h| h.profile_id() == profile)
            .ok_or(EngineError::ProfileHandlerNotRegistered { profile })?;

        let mut context = handler.create_decompressor_context(cid, self.features);
        let result = handler.decompress(context.as_mut(), core, out);
        if result.is_ok() {
            // Context creation is transactional on IR acceptance.
            self.contexts.insert(cid, context);
            debug!("created decompressor context {} for profile {:?}", cid, profile);
        }
        result
    }

    /// Queues mode-appropriate feedback for the outcome of one packet.
    fn queue_feedback_for(&mut self, cid: ContextId, result: &Result<usize, RohcError>) {
        if self.mode == OperMode::Unidirectional {
            return;
        }
        let state = self
            .contexts
            .get(cid)
            .map(|c| c.state())
            .unwrap_or(DecompState::NoContext);
        let msn = self
            .contexts
            .get(cid)
            .and_then(|c| c.ack_msn())
            .map(|m| m.value());

        let element = match result {
            Ok(_) => {
                let updating = state == DecompState::FullContext;
                let ack_every_packet = self.mode == OperMode::Reliable;
                if updating && (ack_every_packet || msn.is_some()) {
                    build_feedback2(cid, AckType::Ack, self.mode, msn, &self.crc, self.cid_type)
                } else {
                    return;
                }
            }
            Err(e) => match e.status() {
                RohcStatus::BadCrc => {
                    let ack_type = match state {
                        DecompState::FullContext => AckType::Nack,
                        _ => AckType::StaticNack,
                    };
                    build_feedback2(cid, ack_type, self.mode, msn, &self.crc, self.cid_type)
                }
                // A packet the current state cannot accept: ask for a
                // context refresh appropriate to the damage.
                _ if matches!(
                    e,
                    RohcError::Decompression(DecompressionError::NotAllowedInState { .. })
                ) =>
                {
                    let ack_type = match state {
                        DecompState::StaticContext => AckType::Nack,
                        _ => AckType::StaticNack,
                    };
                    build_feedback2(cid, ack_type, self.mode, msn, &self.crc, self.cid_type)
                }
                RohcStatus::NoContext => build_feedback2(
                    cid,
                    AckType::Nack,
                    self.mode,
                    None,
                    &self.crc,
                    self.cid_type,
                ),
                _ => return,
            },
        };
        match wrap_feedback(&element) {
            Ok(wrapped) => {
                trace!("queued {} feedback bytes for {}", wrapped.len(), cid);
                self.feedback_queue.push_back(wrapped);
            }
            Err(e) => warn!("feedback element could not be wrapped: {}", e),
        }
    }
}
