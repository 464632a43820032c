//! ROHC profile implementations.
//!
//! - `uncompressed`: profile 0x0000 passthrough
//! - `rtp`: profile 0x0001, RTP/UDP/IPv4 (RFC 3095)
//! - `seq`: the sequential-MSN v1 profiles — UDP 0x0002, ESP 0x0003,
//!   IP 0x0004, UDP-Lite 0x0008
//! - `v2`: ROHCv2 profiles — IP/UDP 0x0102 and IP-only 0x0104 (RFC 5225)

pub mod rtp;
pub mod seq;
pub mod uncompressed;
pub mod v2;

use crate::traits::ProfileHandler;

pub use rtp::RtpHandler;
pub use seq::SeqHandler;
pub use uncompressed::UncompressedHandler;
pub use v2::V2Handler;

/// All profile handlers in classification precedence order: the most specific
/// profile that matches a packet wins, and the Uncompressed profile accepts
/// everything, so classification never fails while it is enabled.
pub fn default_handlers() -> Vec<Box<dyn ProfileHandler>> {
    vec![
        Box::new(RtpHandler::new()),
        Box::new(SeqHandler::udp()),
        Box::new(SeqHandler::esp()),
        Box::new(SeqHandler::udplite()),
        Box::new(V2Handler::ip_udp()),
        Box::new(SeqHandler::ip()),
        Box::new(V2Handler::ip_only()),
        Box::new(UncompressedHandler::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_implemented_profile() {
        let handlers = default_handlers();
        let ids: Vec<u16> = handlers.iter().map(|h| h.profile_id().into()).collect();
        for expected in [0x0000u16, 0x0001, 0x0002, 0x0003, 0x0004, 0x0008, 0x0102, 0x0104] {
            assert!(ids.contains(&expected), "missing profile 0x{expected:04X}");
        }
    }

    #[test]
    fn uncompressed_is_last_in_precedence() {
        let handlers = default_handlers();
        assert_eq!(
            u16::from(handlers.last().unwrap().profile_id()),
            0x0000u16
        );
    }
}
