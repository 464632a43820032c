//! The sequential-MSN v1 profiles: UDP/IP (0x0002), ESP/IP (0x0003),
//! IP-only (0x0004) and UDP-Lite/IP (0x0008).
//!
//! These profiles share one machinery: a Master Sequence Number generated by
//! the compressor (taken from the ESP sequence number for ESP), an IP-ID
//! tracked as an offset against the MSN, and a reduced packet menu of IR,
//! IR-DYN, UO-0, UO-1 and UOR-2. A per-profile descriptor selects the
//! transport-specific chain fields.

pub mod context;
pub mod handler;
pub mod packets;

pub use self::context::{SeqCompressorContext, SeqDecompressorContext, SeqPacketView, Transport};
pub use self::handler::SeqHandler;
pub use self::packets::SeqPacketType;
