//! Error types for the ROHC engines.
//!
//! Errors are layered: parsing and building errors carry structured context,
//! compression/decompression errors add the affected CID, and `RohcError`
//! consolidates everything for the public API. The coarse status codes of the
//! wire-level API are derivable from any error via [`RohcError::status`].

use thiserror::Error;

use crate::packet_defs::RohcProfile;
use crate::types::ContextId;

/// Location within a packet where a parse ran short or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    PacketInput,
    CorePacketAfterCid,
    CidParsing,
    ProfileIdPeek,
    Ipv4Header,
    Ipv6Header,
    UdpHeader,
    EspHeader,
    RtpHeader,
    StaticChain,
    DynamicChain,
    IrregularChain,
    IrPacket,
    IrDynPacket,
    Uo0Packet,
    Uo1Packet,
    Uor2Packet,
    Pt0Packet,
    Pt1Packet,
    Pt2Packet,
    CoCommonPacket,
    CoRepairPacket,
    NormalPacket,
    FeedbackHeader,
    FeedbackOption,
    SdvlValue,
}

impl std::fmt::Display for ParseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PacketInput => "packet input",
            Self::CorePacketAfterCid => "core packet after CID processing",
            Self::CidParsing => "CID parsing",
            Self::ProfileIdPeek => "profile octet peek",
            Self::Ipv4Header => "IPv4 header",
            Self::Ipv6Header => "IPv6 header",
            Self::UdpHeader => "UDP header",
            Self::EspHeader => "ESP header",
            Self::RtpHeader => "RTP header",
            Self::StaticChain => "static chain",
            Self::DynamicChain => "dynamic chain",
            Self::IrregularChain => "irregular chain",
            Self::IrPacket => "IR packet",
            Self::IrDynPacket => "IR-DYN packet",
            Self::Uo0Packet => "UO-0 packet",
            Self::Uo1Packet => "UO-1 packet",
            Self::Uor2Packet => "UOR-2 packet",
            Self::Pt0Packet => "pt_0 packet",
            Self::Pt1Packet => "pt_1_seq_id packet",
            Self::Pt2Packet => "pt_2_seq_id packet",
            Self::CoCommonPacket => "co_common packet",
            Self::CoRepairPacket => "co_repair packet",
            Self::NormalPacket => "normal packet",
            Self::FeedbackHeader => "feedback header",
            Self::FeedbackOption => "feedback option",
            Self::SdvlValue => "SDVL value",
        };
        write!(f, "{}", s)
    }
}

/// Field names for structured error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Cid,
    ProfileId,
    NumLsbBits,
    ReceivedLsbs,
    IpVersion,
    RtpVersion,
    IpIhl,
    IpProtocol,
    IpId,
    IpIdBehavior,
    Msn,
    SequenceNumber,
    Timestamp,
    TsStride,
    TsScaled,
    Marker,
    Ssrc,
    ReorderRatio,
    ChecksumCoverage,
    Crc,
    WindowWidth,
    BufferSize,
    FeedbackOptionType,
    AckType,
    SdvlPrefix,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cid => "CID",
            Self::ProfileId => "profile ID",
            Self::NumLsbBits => "num_lsb_bits",
            Self::ReceivedLsbs => "received_lsbs",
            Self::IpVersion => "IP version",
            Self::RtpVersion => "RTP version",
            Self::IpIhl => "IPv4 IHL",
            Self::IpProtocol => "IP protocol",
            Self::IpId => "IP-ID",
            Self::IpIdBehavior => "IP-ID behavior",
            Self::Msn => "MSN",
            Self::SequenceNumber => "sequence number",
            Self::Timestamp => "timestamp",
            Self::TsStride => "TS_STRIDE",
            Self::TsScaled => "TS_SCALED",
            Self::Marker => "marker",
            Self::Ssrc => "SSRC",
            Self::ReorderRatio => "reorder_ratio",
            Self::ChecksumCoverage => "checksum coverage",
            Self::Crc => "CRC",
            Self::WindowWidth => "window width",
            Self::BufferSize => "buffer size",
            Self::FeedbackOptionType => "feedback option type",
            Self::AckType => "ack type",
            Self::SdvlPrefix => "SDVL prefix",
        };
        write!(f, "{}", s)
    }
}

/// Network layer a protocol error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    Ip,
    Udp,
    Esp,
    Rtp,
}

impl std::fmt::Display for NetworkLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ip => "IP",
            Self::Udp => "UDP",
            Self::Esp => "ESP",
            Self::Rtp => "RTP",
        };
        write!(f, "{}", s)
    }
}

/// CRC flavors used across the packet formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcType {
    /// 3-bit CRC over the uncompressed reference (UO-0, UO-1, pt_0_crc3, pt_1).
    Crc3,
    /// 7-bit CRC over the uncompressed reference (UOR-2, pt_0_crc7, pt_2).
    Crc7,
    /// 8-bit CRC over IR/IR-DYN content.
    Crc8,
    /// 3-bit CRC over decoded control fields (ROHCv2).
    ControlCrc3,
    /// 8-bit CRC protecting a feedback element.
    FeedbackCrc,
}

impl std::fmt::Display for CrcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crc3 => "CRC-3",
            Self::Crc7 => "CRC-7",
            Self::Crc8 => "CRC-8",
            Self::ControlCrc3 => "control CRC-3",
            Self::FeedbackCrc => "feedback CRC-8",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised while parsing ROHC packets or uncompressed headers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcParsingError {
    /// Insufficient data for a complete field or structure.
    #[error("incomplete data: needed {needed} bytes, got {got} for {context}")]
    NotEnoughData {
        needed: usize,
        got: usize,
        context: ParseContext,
    },

    /// Profile octet does not resolve to any enabled profile.
    #[error("invalid or disabled ROHC profile octet: 0x{0:02X}")]
    InvalidProfileId(u8),

    /// Discriminator not assigned in the current profile's packet set.
    #[error("unknown packet type 0x{discriminator:02X} for profile {profile_id:?}")]
    UnknownPacketType {
        discriminator: u8,
        profile_id: Option<u16>,
    },

    /// IP version field did not match expectation.
    #[error("invalid IP version: expected {expected}, got {got}")]
    InvalidIpVersion { expected: u8, got: u8 },

    /// Protocol not compressible by the profile examining it.
    #[error("unsupported protocol {protocol_id} in {layer} header")]
    UnsupportedProtocol {
        protocol_id: u8,
        layer: NetworkLayer,
    },

    /// CRC verification failure.
    #[error("{crc_type} mismatch: expected 0x{expected:X}, computed 0x{calculated:X}")]
    CrcMismatch {
        expected: u8,
        calculated: u8,
        crc_type: CrcType,
    },

    /// W-LSB operation could not complete.
    #[error("invalid LSB operation for {field}: {description}")]
    InvalidLsbOperation { field: Field, description: String },

    /// A field held a value outside its legal range.
    #[error("invalid value for {field}: expected {expected}, got {got}")]
    InvalidFieldValue { field: Field, expected: u32, got: u32 },

    /// Reserved bits were set where the format requires zero.
    #[error("reserved bits set in {context}")]
    ReservedBitsSet { context: ParseContext },

    /// ROHC segmentation is not supported by this implementation.
    #[error("ROHC segment packets are not supported")]
    SegmentNotSupported,
}

/// Errors raised while building ROHC packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcBuildingError {
    /// Caller-provided output buffer was too small.
    #[error("output buffer too small: needed {needed} bytes, have {available} for {context}")]
    BufferTooSmall {
        needed: usize,
        available: usize,
        context: ParseContext,
    },

    /// Context lacks a value required by the chosen packet format.
    #[error("context insufficient for building packet: missing {field}")]
    ContextInsufficient { field: Field },

    /// Field value does not fit the bit budget of the chosen format.
    #[error("value {value} for {field} exceeds {max_bits}-bit field")]
    InvalidFieldValueForBuild {
        field: Field,
        value: u32,
        max_bits: u8,
    },

    /// Value cannot be represented in SDVL (more than 29 bits needed).
    #[error("value 0x{value:X} is not SDVL-encodable")]
    NotSdvlEncodable { value: u32 },
}

/// Errors raised by compression operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// No enabled profile accepted the packet. Unreachable while the
    /// Uncompressed profile is enabled.
    #[error("no enabled profile matches the uncompressed packet")]
    NoMatchingProfile,

    /// Context disappeared mid-operation.
    #[error("compressor context {cid} not found")]
    ContextNotFound { cid: ContextId },

    /// Packet building failed.
    #[error("packet building failed: {0}")]
    BuildingFailed(#[from] RohcBuildingError),
}

/// Errors raised by decompression operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressionError {
    /// Non-IR packet arrived on an unknown CID.
    #[error("decompressor context {cid} not found")]
    ContextNotFound { cid: ContextId },

    /// Header CRC failed after all repair attempts.
    #[error("CRC mismatch in context {cid}: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch {
        cid: ContextId,
        expected: u8,
        actual: u8,
    },

    /// W-LSB decode failed for a field.
    #[error("LSB decoding failed for {field} in context {cid}")]
    LsbDecodingFailed { cid: ContextId, field: Field },

    /// Packet type cannot be processed in the context's current state.
    #[error("packet type {packet_type:#04x} not acceptable for context {cid} in its current state")]
    NotAllowedInState { cid: ContextId, packet_type: u8 },

    /// Underlying parse failure.
    #[error("packet parsing failed: {0}")]
    ParsingFailed(#[from] RohcParsingError),
}

/// Errors raised by engine construction and configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No handler registered for the profile.
    #[error("profile handler for {profile:?} not registered")]
    ProfileHandlerNotRegistered { profile: RohcProfile },

    /// Profile disabled by configuration.
    #[error("profile {profile:?} is not enabled")]
    ProfileNotEnabled { profile: RohcProfile },

    /// Two enabled profiles would share the same IR profile octet.
    #[error("profiles {first:?} and {second:?} share IR profile octet and cannot both be enabled")]
    ProfileOctetConflict {
        first: RohcProfile,
        second: RohcProfile,
    },

    /// Configuration value rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: &'static str },

    /// Internal invariant violated.
    #[error("internal engine error: {reason}")]
    Internal { reason: &'static str },
}

/// Top-level error type consolidating all categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcError {
    /// Error during compression.
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Error during decompression.
    #[error("decompression error: {0}")]
    Decompression(#[from] DecompressionError),

    /// Error during packet parsing.
    #[error("parsing error: {0}")]
    Parsing(#[from] RohcParsingError),

    /// Error during packet building.
    #[error("building error: {0}")]
    Building(#[from] RohcBuildingError),

    /// Engine-level error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Coarse status codes of the external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RohcStatus {
    Ok,
    NoContext,
    OutputTooSmall,
    BadCrc,
    Malformed,
    Segment,
    Error,
}

impl RohcError {
    /// Maps an error onto the coarse status code of the wire-level API.
    pub fn status(&self) -> RohcStatus {
        match self {
            RohcError::Decompression(DecompressionError::ContextNotFound { .. }) => {
                RohcStatus::NoContext
            }
            RohcError::Decompression(DecompressionError::CrcMismatch { .. })
            | RohcError::Parsing(RohcParsingError::CrcMismatch { .. }) => RohcStatus::BadCrc,
            RohcError::Building(RohcBuildingError::BufferTooSmall { .. })
            | RohcError::Compression(CompressionError::BuildingFailed(
                RohcBuildingError::BufferTooSmall { .. },
            )) => RohcStatus::OutputTooSmall,
            RohcError::Parsing(RohcParsingError::SegmentNotSupported) => RohcStatus::Segment,
            RohcError::Parsing(_)
            | RohcError::Decompression(DecompressionError::ParsingFailed(_))
            | RohcError::Decompression(DecompressionError::NotAllowedInState { .. }) => {
                RohcStatus::Malformed
            }
            _ => RohcStatus::Error,
        }
    }

    /// True if this error is an expected consequence of packet loss or
    /// corruption rather than an implementation defect.
    pub fn is_expected_with_packet_loss(&self) -> bool {
        matches!(
            self,
            RohcError::Parsing(RohcParsingError::CrcMismatch { .. })
                | RohcError::Decompression(DecompressionError::CrcMismatch { .. })
                | RohcError::Decompression(DecompressionError::ContextNotFound { .. })
                | RohcError::Decompression(DecompressionError::LsbDecodingFailed { .. })
                | RohcError::Decompression(DecompressionError::NotAllowedInState { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_enough_data_display() {
        let err = RohcParsingError::NotEnoughData {
            needed: 10,
            got: 5,
            context: ParseContext::IrPacket,
        };
        assert_eq!(
            format!("{}", err),
            "incomplete data: needed 10 bytes, got 5 for IR packet"
        );
    }

    #[test]
    fn crc_mismatch_maps_to_bad_crc_status() {
        let err: RohcError = RohcParsingError::CrcMismatch {
            expected: 0x3,
            calculated: 0x5,
            crc_type: CrcType::Crc3,
        }
        .into();
        assert_eq!(err.status(), RohcStatus::BadCrc);
        assert!(err.is_expected_with_packet_loss());
    }

    #[test]
    fn context_not_found_maps_to_no_context_status() {
        let err: RohcError = DecompressionError::ContextNotFound {
            cid: ContextId::new(4),
        }
        .into();
        assert_eq!(err.status(), RohcStatus::NoContext);
    }

    #[test]
    fn buffer_too_small_maps_to_output_too_small() {
        let err: RohcError = RohcBuildingError::BufferTooSmall {
            needed: 42,
            available: 1,
            context: ParseContext::IrPacket,
        }
        .into();
        assert_eq!(err.status(), RohcStatus::OutputTooSmall);
    }

    #[test]
    fn segment_maps_to_segment_status() {
        let err: RohcError = RohcParsingError::SegmentNotSupported.into();
        assert_eq!(err.status(), RohcStatus::Segment);
    }

    #[test]
    fn parse_errors_map_to_malformed() {
        let err: RohcError = RohcParsingError::ReservedBitsSet {
            context: ParseContext::CoRepairPacket,
        }
        .into();
        assert_eq!(err.status(), RohcStatus::Malformed);
    }

    #[test]
    fn from_conversions_preserve_inner_error() {
        let parsing = RohcParsingError::InvalidProfileId(0xAB);
        let err = RohcError::from(parsing.clone());
        match err {
            RohcError::Parsing(inner) => assert_eq!(inner, parsing),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
