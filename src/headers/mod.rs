//! Parsing and rebuilding of uncompressed protocol headers.
//!
//! All extraction is explicit shift/mask work on network-byte-order fields;
//! nothing here overlays structs on packet bytes. Each parser returns a typed
//! header plus the bytes it consumed, and each builder writes the exact wire
//! form back, so the compress/decompress round trip is byte-for-byte.

pub mod esp;
pub mod ipv4;
pub mod ipv6;
pub mod rtp;
pub mod udp;

pub use esp::EspHeader;
pub use ipv4::Ipv4Header;
pub use ipv6::Ipv6Header;
pub use rtp::RtpHeader;
pub use udp::UdpHeader;
