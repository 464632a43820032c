//! ROHC profile 0x0001: RTP/UDP/IPv4 compression (RFC 3095).
//!
//! The profile with the full packet menu: IR, IR-DYN, UO-0, the three UO-1
//! variants, the three UOR-2 variants, plus the TS_STRIDE scaling subsystem
//! and IP-ID behavior tracking.

pub mod compression;
pub mod constants;
pub mod context;
pub mod decompression;
pub mod handler;
pub mod packets;

pub use self::context::{RtpCompressorContext, RtpDecompressorContext, RtpPacketView};
pub use self::handler::RtpHandler;
pub use self::packets::RtpPacketType;
