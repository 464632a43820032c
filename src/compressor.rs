//! The ROHC compressor engine.
//!
//! Routes each uncompressed packet to a profile by precedence-ordered match
//! predicates, then to a per-flow context found through a flow-signature map,
//! and finally emits the CID-framed ROHC packet produced by the profile
//! handler. Feedback from the peer decompressor is delivered through
//! [`Compressor::deliver_feedback`].

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use log::{debug, trace};

use crate::constants::{ADD_CID_PREFIX, ALLOWED_WLSB_WIDTHS, DEFAULT_IR_REFRESH_INTERVAL, DEFAULT_WLSB_WIDTH, SMALL_CID_MASK};
use crate::context_manager::ContextTable;
use crate::crc::CrcCalculators;
use crate::encodings::sdvl_encode;
use crate::error::{CompressionError, EngineError, ParseContext, RohcBuildingError, RohcError};
use crate::feedback::parse_feedback_stream;
use crate::packet_defs::{CidType, Features, OperMode, RohcProfile};
use crate::profiles::default_handlers;
use crate::rand::RandomSource;
use crate::time::Clock;
use crate::traits::{ClassifyEnv, CompressorProfileConfig, ProfileHandler, RohcCompressorContext, RtpDetector};
use crate::types::ContextId;

/// Profiles enabled when the caller does not configure any: the RFC 3095
/// family. ROHCv2 profiles share IR profile octets with their v1 counterparts
/// and must be opted into explicitly.
const DEFAULT_ENABLED: [RohcProfile; 6] = [
    RohcProfile::Rtp,
    RohcProfile::Udp,
    RohcProfile::Esp,
    RohcProfile::UdpLite,
    RohcProfile::Ip,
    RohcProfile::Uncompressed,
];

/// The compressor side of a ROHC channel.
pub struct Compressor {
    cid_type: CidType,
    handlers: Vec<Box<dyn ProfileHandler>>,
    enabled: Vec<RohcProfile>,
    contexts: ContextTable<dyn RohcCompressorContext>,
    flow_cids: HashMap<u64, ContextId>,
    cid_flows: Vec<Option<u64>>,
    wlsb_width: u8,
    features: Features,
    ir_refresh_interval: u32,
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    rtp_detector: Option<Box<RtpDetector>>,
    crc: CrcCalculators,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("cid_type", &self.cid_type)
            .field("enabled", &self.enabled)
            .field("contexts", &self.contexts.len())
            .field("wlsb_width", &self.wlsb_width)
            .field("features", &self.features)
            .finish()
    }
}

impl Compressor {
    /// Creates a compressor for up to `max_contexts` concurrent flows.
    ///
    /// # Errors
    /// - [`EngineError::InvalidConfiguration`] - `max_contexts` is zero or
    ///   exceeds the CID space of `cid_type`
    pub fn new(
        cid_type: CidType,
        max_contexts: usize,
        rng: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
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
            flow_cids: HashMap::new(),
            cid_flows: vec![None; max_contexts],
            wlsb_width: DEFAULT_WLSB_WIDTH,
            features: Features::NONE,
            ir_refresh_interval: DEFAULT_IR_REFRESH_INTERVAL,
            rng,
            clock,
            rtp_detector: None,
            crc: CrcCalculators::new(),
        })
    }

    /// Replaces the enabled-profile set.
    ///
    /// # Errors
    /// - [`EngineError::ProfileHandlerNotRegistered`] - unknown profile
    /// - [`EngineError::ProfileOctetConflict`] - two profiles would share an
    ///   IR profile octet on this channel
    pub fn enable_profiles(&mut self, profiles: &[RohcProfile]) -> Result<(), EngineError> {
        validate_profile_set(&self.handlers, profiles)?;
        self.enabled = profiles.to_vec();
        Ok(())
    }

    /// Sets the W-LSB reference window width for new contexts.
    ///
    /// # Errors
    /// - [`EngineError::InvalidConfiguration`] - width not a power of two
    ///   within 1..=64
    pub fn set_wlsb_width(&mut self, width: u8) -> Result<(), EngineError> {
        if !ALLOWED_WLSB_WIDTHS.contains(&width) {
            return Err(EngineError::InvalidConfiguration {
                reason: "wlsb window width must be a power of two within 1..=64",
            });
        }
        self.wlsb_width = width;
        Ok(())
    }

    /// Sets the engine feature flags.
    pub fn set_features(&mut self, features: Features) {
        self.features = features;
    }

    /// Sets the packet-count interval for periodic IR refreshes.
    pub fn set_ir_refresh_interval(&mut self, interval: u32) {
        self.ir_refresh_interval = interval;
    }

    /// Installs the caller-supplied RTP classifier.
    pub fn set_rtp_detector(&mut self, detector: Box<RtpDetector>) {
        self.rtp_detector = Some(detector);
    }

    /// Number of live compression contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Compresses one uncompressed packet into `out`, returning the ROHC
    /// packet length. A failed call leaves every context unchanged.
    ///
    /// # Errors
    /// - [`CompressionError::NoMatchingProfile`] - no enabled profile accepts
    ///   the packet (only possible with Uncompressed disabled)
    /// - [`RohcBuildingError::BufferTooSmall`] - `out` cannot hold the packet
    /// - parse errors for malformed uncompressed input
    pub fn compress(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize, RohcError> {
        let env = ClassifyEnv {
            rtp_detector: self.rtp_detector.as_deref(),
            features: self.features,
        };
        let handler_index = self
            .handlers
            .iter()
            .position(|h| self.enabled.contains(&h.profile_id()) && h.matches(packet, &env))
            .ok_or(CompressionError::NoMatchingProfile)?;
        let handler = &self.handlers[handler_index];
        let profile = handler.profile_id();

        let flow_key = flow_key(profile, handler.flow_signature(packet));
        let cid = match self.flow_cids.get(&flow_key) {
            Some(&cid) if self.contexts.get(cid).map(|c| c.profile_id()) == Some(profile) => cid,
            _ => {
                let start = ContextId::new(
                    (self.rng.next_u32() as usize % self.contexts.capacity()) as u16,
                );
                let (cid, evicted) = self.contexts.allocate(start);
                if evicted.is_some() {
                    // The LRU flow loses its slot; drop its signature mapping.
                    if let Some(old_key) = self.cid_flows[cid.value() as usize].take() {
                        self.flow_cids.remove(&old_key);
                        debug!("evicted LRU context {} for new flow", cid);
                    }
                }
                let config = CompressorProfileConfig {
                    ir_refresh_interval: self.ir_refresh_interval,
                    wlsb_width: self.wlsb_width,
                    features: self.features,
                    msn_seed: self.rng.next_u32() as u16,
                    mode: OperMode::Unidirectional,
                };
                let context = handler.create_compressor_context(cid, &config);
                self.contexts.insert(cid, context);
                self.flow_cids.insert(flow_key, cid);
                self.cid_flows[cid.value() as usize] = Some(flow_key);
                debug!("created compressor context {} for profile {:?}", cid, profile);
                cid
            }
        };

        // Reserve CID framing space around the core packet.
        let now = self.clock.now();
        let written = match self.cid_type {
            CidType::Small => {
                let prefix = usize::from(cid.value() > 0);
                if out.len() < prefix + 1 {
                    return Err(RohcBuildingError::BufferTooSmall {
                        needed: prefix + 1,
                        available: out.len(),
                        context: ParseContext::PacketInput,
                    }
                    .into());
                }
                let context = self
                    .contexts
                    .get_mut(cid)
                    .ok_or(CompressionError::ContextNotFound { cid })?;
                let core_len = handler.compress(context, packet, now, &mut out[prefix..])?;
                if prefix == 1 {
                    out[0] = ADD_CID_PREFIX | (cid.value() as u8 & SMALL_CID_MASK);
                }
                prefix + core_len
            }
            CidType::Large => {
                let mut cid_bytes = [0u8; 4];
                let cid_len = sdvl_encode(cid.value() as u32, &mut cid_bytes)
                    .map_err(RohcError::Building)?;
                let budget = out.len().saturating_sub(cid_len);
                let context = self
                    .contexts
                    .get_mut(cid)
                    .ok_or(CompressionError::ContextNotFound { cid })?;
                let core_len = handler.compress(context, packet, now, &mut out[..budget])?;
                // Large CIDs ride after the first core octet.
                out.copy_within(1..core_len, 1 + cid_len);
                out[1..1 + cid_len].copy_from_slice(&cid_bytes[..cid_len]);
                core_len + cid_len
            }
        };

        trace!(
            "compressed {} uncompressed bytes into {} ROHC bytes on {} ({:?})",
            packet.len(),
            written,
            cid,
            profile
        );
        if self.features.contains(Features::DUMP_PACKETS) {
            debug!("{} out: {:02x?}", cid, &out[..written]);
        }
        Ok(written)
    }

    /// Integrates feedback received from the peer decompressor. Delivering
    /// the same bytes twice leaves the compressor in the same state as one
    /// delivery.
    ///
    /// # Errors
    /// - parse errors for structurally broken feedback
    pub fn deliver_feedback(&mut self, bytes: &[u8]) -> Result<(), RohcError> {
        let units = parse_feedback_stream(bytes, self.cid_type, &self.crc)?;
        for unit in units {
            let Some(profile) = self.contexts.get(unit.cid).map(|c| c.profile_id()) else {
                debug!("feedback for unknown context {}, ignored", unit.cid);
                continue;
            };
            let Some(handler) = self.handlers.iter().find(|h| h.profile_id() == profile) else {
                continue;
            };
            let context = self
                .contexts
                .get_mut(unit.cid)
                .expect("context present above");
            trace!("delivering {:?} feedback to {}", unit.ack_type, unit.cid);
            handler.handle_feedback(context, &unit);
        }
        Ok(())
    }
}

/// Validates that every profile in `set` is registered and that no two share
/// an IR profile octet.
pub(crate) fn validate_profile_set(
    handlers: &[Box<dyn ProfileHandler>],
    set: &[RohcProfile],
) -> Result<(), EngineError> {
    for profile in set {
        if !handlers.iter().any(|h| h.profile_id() == *profile) {
            return Err(EngineError::ProfileHandlerNotRegistered { profile: *profile });
        }
    }
    for (i, first) in set.iter().enumerate() {
        for second in &set[i + 1..] {
            if first.lsb_octet() == second.lsb_octet() {
                return Err(EngineError::ProfileOctetConflict {
                    first: *first,
                    second: *second,
                });
            }
        }
    }
    Ok(())
}

fn flow_key(profile: RohcProfile, signature: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    u16::from(profile).hash(&mut hasher);
    signature.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::FixedRandom;
    use crate::time::SystemClock;

    fn compressor(max_contexts: usize) -> Compressor {
        Compressor::new(
            CidType::Small,
            max_contexts,
            Arc::new(FixedRandom::new(vec![0], 0)),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_bad_capacity() {
        let rng = Arc::new(FixedRandom::new(vec![], 0));
        assert!(Compressor::new(CidType::Small, 0, rng.clone(), Arc::new(SystemClock)).is_err());
        assert!(Compressor::new(CidType::Small, 17, rng.clone(), Arc::new(SystemClock)).is_err());
        assert!(Compressor::new(CidType::Large, 16384, rng, Arc::new(SystemClock)).is_ok());
    }

    #[test]
    fn set_wlsb_width_validates_powers_of_two() {
        let mut comp = compressor(4);
        assert!(comp.set_wlsb_width(4).is_ok());
        assert!(comp.set_wlsb_width(64).is_ok());
        assert!(comp.set_wlsb_width(3).is_err());
        assert!(comp.set_wlsb_width(0).is_err());
        assert!(comp.set_wlsb_width(128).is_err());
    }

    #[test]
    fn enable_profiles_rejects_octet_conflicts() {
        let mut comp = compressor(4);
        let err = comp
            .enable_profiles(&[RohcProfile::Udp, RohcProfile::V2Udp])
            .unwrap_err();
        assert!(matches!(err, EngineError::ProfileOctetConflict { .. }));

        comp.enable_profiles(&[RohcProfile::V2Udp, RohcProfile::V2Ip, RohcProfile::Uncompressed])
            .unwrap();
    }

    #[test]
    fn enable_profiles_rejects_unregistered_profiles() {
        let mut comp = compressor(4);
        let err = comp.enable_profiles(&[RohcProfile::Unknown(0x42)]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ProfileHandlerNotRegistered { .. }
        ));
    }
}
