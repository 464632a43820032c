//! IPv4 header parsing and rebuilding.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::constants::IPV4_MIN_HEADER_LENGTH;
use crate::error::{Field, ParseContext, RohcBuildingError, RohcParsingError};
use crate::types::IpId;

/// An IPv4 header without options (IHL = 5).
///
/// Headers with options are not compressible by any profile here; parsers
/// reject them and the packet falls through to the Uncompressed profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// DSCP and ECN, as one type-of-service octet.
    pub tos: u8,
    /// Total length as seen on the wire.
    pub total_length: u16,
    /// Identification field.
    pub identification: IpId,
    /// Don't Fragment flag.
    pub dont_fragment: bool,
    /// More Fragments flag.
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units.
    pub fragment_offset: u16,
    /// Time to live.
    pub ttl: u8,
    /// Payload protocol number.
    pub protocol: u8,
    /// Header checksum as seen on the wire.
    pub checksum: u16,
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Parses an option-less IPv4 header from the front of `data`.
    ///
    /// # Errors
    /// - `RohcParsingError::NotEnoughData` - fewer than 20 bytes
    /// - `RohcParsingError::InvalidIpVersion` - version field is not 4
    /// - `RohcParsingError::InvalidFieldValue` - IHL is not 5 (options present)
    pub fn parse(data: &[u8]) -> Result<Ipv4Header, RohcParsingError> {
        if data.len() < IPV4_MIN_HEADER_LENGTH {
            return Err(RohcParsingError::NotEnoughData {
                needed: IPV4_MIN_HEADER_LENGTH,
                got: data.len(),
                context: ParseContext::Ipv4Header,
            });
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(RohcParsingError::InvalidIpVersion {
                expected: 4,
                got: version,
            });
        }
        let ihl = data[0] & 0x0F;
        if ihl != 5 {
            return Err(RohcParsingError::InvalidFieldValue {
                field: Field::IpIhl,
                expected: 5,
                got: ihl as u32,
            });
        }

        let flags_and_offset = u16::from_be_bytes([data[6], data[7]]);
        Ok(Ipv4Header {
            tos: data[1],
            total_length: u16::from_be_bytes([data[2], data[3]]),
            identification: IpId::new(u16::from_be_bytes([data[4], data[5]])),
            dont_fragment: (flags_and_offset >> 14) & 0x01 == 1,
            more_fragments: (flags_and_offset >> 13) & 0x01 == 1,
            fragment_offset: flags_and_offset & 0x1FFF,
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Writes the header into `out`, recomputing the checksum. Returns the
    /// number of bytes written (always 20).
    ///
    /// # Errors
    /// - `RohcBuildingError::BufferTooSmall` - `out` shorter than 20 bytes
    pub fn build(&self, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
        if out.len() < IPV4_MIN_HEADER_LENGTH {
            return Err(RohcBuildingError::BufferTooSmall {
                needed: IPV4_MIN_HEADER_LENGTH,
                available: out.len(),
                context: ParseContext::Ipv4Header,
            });
        }

        out[0] = 0x45;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.identification.value().to_be_bytes());
        let mut flags_and_offset = self.fragment_offset & 0x1FFF;
        if self.dont_fragment {
            flags_and_offset |= 1 << 14;
        }
        if self.more_fragments {
            flags_and_offset |= 1 << 13;
        }
        out[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10] = 0;
        out[11] = 0;
        out[12..16].copy_from_slice(&self.src.octets());
        out[16..20].copy_from_slice(&self.dst.octets());

        let checksum = header_checksum(&out[..IPV4_MIN_HEADER_LENGTH]);
        out[10..12].copy_from_slice(&checksum.to_be_bytes());
        Ok(IPV4_MIN_HEADER_LENGTH)
    }

    /// Checksum this header would carry if well formed.
    pub fn expected_checksum(&self) -> u16 {
        let mut scratch = [0u8; IPV4_MIN_HEADER_LENGTH];
        // build() cannot fail on a right-sized buffer.
        let _ = self.build(&mut scratch);
        u16::from_be_bytes([scratch[10], scratch[11]])
    }
}

/// RFC 1071 ones' complement sum over a header with its checksum field zeroed.
pub fn header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = header.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> [u8; 20] {
        let header = Ipv4Header {
            tos: 0,
            total_length: 40,
            identification: IpId::new(0x1234),
            dont_fragment: true,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: 17,
            checksum: 0,
            src: Ipv4Addr::new(192, 168, 1, 1),
            dst: Ipv4Addr::new(192, 168, 1, 2),
        };
        let mut buf = [0u8; 20];
        header.build(&mut buf).unwrap();
        buf
    }

    #[test]
    fn parse_build_round_trip() {
        let bytes = sample_bytes();
        let parsed = Ipv4Header::parse(&bytes).unwrap();
        assert_eq!(parsed.identification, 0x1234);
        assert!(parsed.dont_fragment);
        assert_eq!(parsed.protocol, 17);
        assert_eq!(parsed.checksum, parsed.expected_checksum());

        let mut rebuilt = [0u8; 20];
        parsed.build(&mut rebuilt).unwrap();
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut bytes = sample_bytes();
        bytes[0] = 0x65;
        assert!(matches!(
            Ipv4Header::parse(&bytes),
            Err(RohcParsingError::InvalidIpVersion { got: 6, .. })
        ));
    }

    #[test]
    fn parse_rejects_options() {
        let mut bytes = sample_bytes();
        bytes[0] = 0x46;
        assert!(matches!(
            Ipv4Header::parse(&bytes),
            Err(RohcParsingError::InvalidFieldValue {
                field: Field::IpIhl,
                ..
            })
        ));
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(Ipv4Header::parse(&[0x45, 0x00]).is_err());
    }

    #[test]
    fn checksum_detects_corruption() {
        let mut bytes = sample_bytes();
        let good = u16::from_be_bytes([bytes[10], bytes[11]]);
        bytes[8] = bytes[8].wrapping_add(1);
        bytes[10] = 0;
        bytes[11] = 0;
        assert_ne!(header_checksum(&bytes), good);
    }
}
