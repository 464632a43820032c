//! IPv6 header parsing and rebuilding.

use serde::{Deserialize, Serialize};

use crate::constants::IPV6_HEADER_LENGTH;
use crate::error::{ParseContext, RohcBuildingError, RohcParsingError};

/// A fixed 40-byte IPv6 header. Extension headers are not compressible and
/// leave the packet to the Uncompressed profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Header {
    /// Traffic class octet.
    pub traffic_class: u8,
    /// 20-bit flow label.
    pub flow_label: u32,
    /// Payload length as seen on the wire.
    pub payload_length: u16,
    /// Next header protocol number.
    pub next_header: u8,
    /// Hop limit.
    pub hop_limit: u8,
    /// Source address.
    pub src: [u8; 16],
    /// Destination address.
    pub dst: [u8; 16],
}

impl Ipv6Header {
    /// Parses an IPv6 base header from the front of `data`.
    ///
    /// # Errors
    /// - `RohcParsingError::NotEnoughData` - fewer than 40 bytes
    /// - `RohcParsingError::InvalidIpVersion` - version field is not 6
    pub fn parse(data: &[u8]) -> Result<Ipv6Header, RohcParsingError> {
        if data.len() < IPV6_HEADER_LENGTH {
            return Err(RohcParsingError::NotEnoughData {
                needed: IPV6_HEADER_LENGTH,
                got: data.len(),
                context: ParseContext::Ipv6Header,
            });
        }
        let version = data[0] >> 4;
        if version != 6 {
            return Err(RohcParsingError::InvalidIpVersion {
                expected: 6,
                got: version,
            });
        }

        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&data[8..24]);
        dst.copy_from_slice(&data[24..40]);
        Ok(Ipv6Header {
            traffic_class: ((data[0] & 0x0F) << 4) | (data[1] >> 4),
            flow_label: (((data[1] & 0x0F) as u32) << 16)
                | ((data[2] as u32) << 8)
                | data[3] as u32,
            payload_length: u16::from_be_bytes([data[4], data[5]]),
            next_header: data[6],
            hop_limit: data[7],
            src,
            dst,
        })
    }

    /// Writes the header into `out`. Returns the bytes written (always 40).
    ///
    /// # Errors
    /// - `RohcBuildingError::BufferTooSmall` - `out` shorter than 40 bytes
    pub fn build(&self, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
        if out.len() < IPV6_HEADER_LENGTH {
            return Err(RohcBuildingError::BufferTooSmall {
                needed: IPV6_HEADER_LENGTH,
                available: out.len(),
                context: ParseContext::Ipv6Header,
            });
        }
        out[0] = 0x60 | (self.traffic_class >> 4);
        out[1] = ((self.traffic_class & 0x0F) << 4) | ((self.flow_label >> 16) as u8 & 0x0F);
        out[2] = (self.flow_label >> 8) as u8;
        out[3] = self.flow_label as u8;
        out[4..6].copy_from_slice(&self.payload_length.to_be_bytes());
        out[6] = self.next_header;
        out[7] = self.hop_limit;
        out[8..24].copy_from_slice(&self.src);
        out[24..40].copy_from_slice(&self.dst);
        Ok(IPV6_HEADER_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_round_trip() {
        let header = Ipv6Header {
            traffic_class: 0xA5,
            flow_label: 0xBEEF5,
            payload_length: 24,
            next_header: 17,
            hop_limit: 63,
            src: [1; 16],
            dst: [2; 16],
        };
        let mut buf = [0u8; 40];
        header.build(&mut buf).unwrap();
        assert_eq!(buf[0] >> 4, 6);

        let parsed = Ipv6Header::parse(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_rejects_wrong_version_and_short_input() {
        let mut buf = [0u8; 40];
        buf[0] = 0x45;
        assert!(matches!(
            Ipv6Header::parse(&buf),
            Err(RohcParsingError::InvalidIpVersion { got: 4, .. })
        ));
        assert!(Ipv6Header::parse(&buf[..10]).is_err());
    }
}
