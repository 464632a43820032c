//! UDP and UDP-Lite header parsing and rebuilding.
//!
//! Both protocols share one 8-byte layout; octets 4..6 hold the datagram
//! length for UDP and the checksum coverage for UDP-Lite. The same struct
//! serves both, profiles interpret `length_or_coverage` per protocol.

use serde::{Deserialize, Serialize};

use crate::constants::UDP_HEADER_LENGTH;
use crate::error::{ParseContext, RohcBuildingError, RohcParsingError};

/// A UDP (or UDP-Lite) header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// UDP length, or UDP-Lite checksum coverage.
    pub length_or_coverage: u16,
    /// Transport checksum; zero means "not computed" for plain UDP over IPv4.
    pub checksum: u16,
}

impl UdpHeader {
    /// Parses a UDP/UDP-Lite header from the front of `data`.
    ///
    /// # Errors
    /// - `RohcParsingError::NotEnoughData` - fewer than 8 bytes
    pub fn parse(data: &[u8]) -> Result<UdpHeader, RohcParsingError> {
        if data.len() < UDP_HEADER_LENGTH {
            return Err(RohcParsingError::NotEnoughData {
                needed: UDP_HEADER_LENGTH,
                got: data.len(),
                context: ParseContext::UdpHeader,
            });
        }
        Ok(UdpHeader {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            length_or_coverage: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Writes the header into `out`. Returns the bytes written (always 8).
    ///
    /// # Errors
    /// - `RohcBuildingError::BufferTooSmall` - `out` shorter than 8 bytes
    pub fn build(&self, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
        if out.len() < UDP_HEADER_LENGTH {
            return Err(RohcBuildingError::BufferTooSmall {
                needed: UDP_HEADER_LENGTH,
                available: out.len(),
                context: ParseContext::UdpHeader,
            });
        }
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length_or_coverage.to_be_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        Ok(UDP_HEADER_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_round_trip() {
        let header = UdpHeader {
            src_port: 5004,
            dst_port: 5004,
            length_or_coverage: 20,
            checksum: 0xABCD,
        };
        let mut buf = [0u8; 8];
        header.build(&mut buf).unwrap();
        assert_eq!(UdpHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(UdpHeader::parse(&[0u8; 7]).is_err());
    }
}
