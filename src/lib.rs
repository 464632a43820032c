//! `rohcore`: a Robust Header Compression (ROHC) engine core in Rust.
//!
//! Implements the compressor and decompressor state machines of RFC 3095 and
//! RFC 5225 over per-flow contexts: W-LSB coding of the changing header
//! fields, packet-type decision engines that pick the smallest legal format,
//! CRC-guarded context updates, and feedback-driven mode transitions.
//!
//! ## Core concepts
//!
//! - **[`Compressor`]** / **[`Decompressor`]**: the two independent engines of
//!   a ROHC channel. Each owns a CID-indexed context table with LRU eviction.
//! - **Profiles**: Uncompressed (0x0000), RTP/UDP/IP (0x0001), UDP (0x0002),
//!   ESP (0x0003), IP (0x0004), UDP-Lite (0x0008) plus the ROHCv2 IP/UDP
//!   (0x0102) and IP (0x0104) profiles, each behind [`ProfileHandler`].
//! - **Contexts**: per-flow state tracking every header field as static,
//!   inferred or transmitted-by-difference, created on IR acceptance and
//!   updated transactionally on CRC success.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use rohcore::{CidType, Compressor, Decompressor, OperMode};
//! use rohcore::rand::SystemRandom;
//! use rohcore::time::SystemClock;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut compressor = Compressor::new(
//!         CidType::Small,
//!         16,
//!         Arc::new(SystemRandom),
//!         Arc::new(SystemClock),
//!     )?;
//!     let mut decompressor = Decompressor::new(CidType::Small, 16, OperMode::Unidirectional)?;
//!
//!     // A minimal IPv4/UDP packet; any packet finds a home in some profile.
//!     let mut packet = vec![
//!         0x45, 0x00, 0x00, 0x1C, 0x00, 0x2A, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00,
//!         0x0A, 0x00, 0x00, 0x01, 0x0A, 0x00, 0x00, 0x02, // IPv4
//!         0x10, 0x00, 0x20, 0x00, 0x00, 0x08, 0x00, 0x00, // UDP
//!     ];
//!     let checksum = rohcore::headers::ipv4::header_checksum(&{
//!         let mut h = packet[..20].to_vec();
//!         h[10] = 0;
//!         h[11] = 0;
//!         h
//!     });
//!     packet[10..12].copy_from_slice(&checksum.to_be_bytes());
//!
//!     let mut compressed = [0u8; 256];
//!     let len = compressor.compress(&packet, &mut compressed)?;
//!
//!     let mut restored = [0u8; 256];
//!     let restored_len = decompressor.decompress(&compressed[..len], &mut restored)?;
//!     assert_eq!(&restored[..restored_len], &packet[..]);
//!     Ok(())
//! }
//! ```

pub mod compressor;
pub mod constants;
pub mod context_manager;
pub mod crc;
pub mod decompressor;
pub mod encodings;
pub mod error;
pub mod feedback;
pub mod headers;
pub mod packet_defs;
pub mod profiles;
pub mod rand;
pub mod state_machine;
pub mod time;
pub mod traits;
pub mod types;

pub use compressor::Compressor;
pub use decompressor::Decompressor;
pub use error::{
    CompressionError, CrcType, DecompressionError, EngineError, Field, NetworkLayer, ParseContext,
    RohcBuildingError, RohcError, RohcParsingError, RohcStatus,
};
pub use feedback::{AckType, FeedbackUnit};
pub use packet_defs::{CidType, DecompState, Features, IpIdBehavior, OperMode, RohcProfile};
pub use traits::{ProfileHandler, RohcCompressorContext, RohcDecompressorContext};
pub use types::{ContextId, IpId, Msn, SequenceNumber, Ssrc, Timestamp};
