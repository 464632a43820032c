//! Core traits binding profiles to the engines.
//!
//! A profile is a static descriptor: a match predicate over uncompressed
//! packets, context constructors, and the compression/decompression entry
//! points. The engines hold profile handlers behind these traits and route
//! per-flow state through the context traits, downcasting inside the profile
//! via `as_any`.

use std::any::Any;
use std::fmt::Debug;
use std::time::Instant;

use crate::error::RohcError;
use crate::feedback::FeedbackUnit;
use crate::packet_defs::{DecompState, Features, OperMode, RohcProfile};
use crate::types::{ContextId, Msn};

/// Caller-supplied RTP classifier: `(udp_payload, src_port, dst_port) -> bool`.
pub type RtpDetector = dyn Fn(&[u8], u16, u16) -> bool + Send + Sync;

/// Inputs available to profile match predicates.
pub struct ClassifyEnv<'a> {
    /// Optional RTP detection callback; when absent the RTP profile falls
    /// back to structural detection (payload parses as RTP version 2).
    pub rtp_detector: Option<&'a RtpDetector>,
    /// Engine feature set.
    pub features: Features,
}

impl Debug for ClassifyEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifyEnv")
            .field("rtp_detector", &self.rtp_detector.is_some())
            .field("features", &self.features)
            .finish()
    }
}

/// Configuration snapshot handed to new compressor contexts.
#[derive(Debug, Clone, Copy)]
pub struct CompressorProfileConfig {
    /// Packet-count interval between periodic IR refreshes.
    pub ir_refresh_interval: u32,
    /// W-LSB reference window width.
    pub wlsb_width: u8,
    /// Engine feature set.
    pub features: Features,
    /// Unpredictable seed for compressor-generated MSNs.
    pub msn_seed: u16,
    /// Operating mode the channel starts in.
    pub mode: OperMode,
}

/// Per-flow state on the compressor side.
pub trait RohcCompressorContext: Send + Debug {
    /// Profile that owns this context.
    fn profile_id(&self) -> RohcProfile;
    /// Context identifier of this flow.
    fn cid(&self) -> ContextId;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Per-flow state on the decompressor side.
pub trait RohcDecompressorContext: Send + Debug {
    /// Profile that owns this context.
    fn profile_id(&self) -> RohcProfile;
    /// Context identifier of this flow.
    fn cid(&self) -> ContextId;
    /// Reassigns the CID (context replacement).
    fn set_cid(&mut self, cid: ContextId);
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Current confidence state, for engine-level feedback decisions.
    fn state(&self) -> DecompState;
    /// MSN to acknowledge, when the context has decoded one.
    fn ack_msn(&self) -> Option<Msn>;
}

/// A ROHC profile implementation.
pub trait ProfileHandler: Send + Sync + Debug {
    /// Profile identifier this handler implements.
    fn profile_id(&self) -> RohcProfile;

    /// True if this profile can compress the uncompressed packet.
    fn matches(&self, packet: &[u8], env: &ClassifyEnv<'_>) -> bool;

    /// Stable per-flow signature over the packet's static fields. Only called
    /// after `matches` returned true.
    fn flow_signature(&self, packet: &[u8]) -> u64;

    /// Creates a compressor context for a new flow.
    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorProfileConfig,
    ) -> Box<dyn RohcCompressorContext>;

    /// Creates a decompressor context for a new CID.
    fn create_decompressor_context(
        &self,
        cid: ContextId,
        features: Features,
    ) -> Box<dyn RohcDecompressorContext>;

    /// Compresses one uncompressed packet into `out` (core packet only; CID
    /// framing is the engine's job). On error the context is left unchanged.
    fn compress(
        &self,
        context: &mut dyn RohcCompressorContext,
        packet: &[u8],
        now: Instant,
        out: &mut [u8],
    ) -> Result<usize, RohcError>;

    /// Decompresses one core ROHC packet into `out`, returning the rebuilt
    /// uncompressed packet length. Context updates are transactional on CRC
    /// success.
    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> Result<usize, RohcError>;

    /// Integrates one feedback element into a compressor context.
    fn handle_feedback(&self, context: &mut dyn RohcCompressorContext, feedback: &FeedbackUnit);
}
