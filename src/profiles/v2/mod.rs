//! ROHCv2 profiles (RFC 5225): IP/UDP (0x0102) and IP-only (0x0104).
//!
//! ROHCv2 reworks the packet menu around a compressor-generated MSN: IR
//! establishes the chains, pt_0/pt_1/pt_2 carry MSN and IP-ID at increasing
//! widths, co_common conveys changed control fields behind indicator bits,
//! and co_repair resynchronizes the dynamic chain under a CRC-7 plus a
//! control-field CRC-3. Both IPv4 and IPv6 flows are supported.
//!
//! The ROHCv2 RTP profile (0x0101) is not implemented; its identifier is
//! reserved in the registry and rejected at configuration time.

pub mod context;
pub mod handler;
pub mod packets;

pub use self::context::{V2CompressorContext, V2DecompressorContext, V2IpInfo, V2PacketView};
pub use self::handler::V2Handler;
pub use self::packets::V2PacketType;
