//! RTP header parsing and rebuilding.

use serde::{Deserialize, Serialize};

use crate::constants::{RTP_MIN_HEADER_LENGTH, RTP_VERSION};
use crate::error::{Field, ParseContext, RohcBuildingError, RohcParsingError};
use crate::types::{SequenceNumber, Ssrc, Timestamp};

/// An RTP fixed header with its CSRC list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpHeader {
    /// Padding flag.
    pub padding: bool,
    /// Extension flag.
    pub extension: bool,
    /// Marker bit.
    pub marker: bool,
    /// Payload type.
    pub payload_type: u8,
    /// Sequence number.
    pub sequence_number: SequenceNumber,
    /// Timestamp.
    pub timestamp: Timestamp,
    /// Synchronization source.
    pub ssrc: Ssrc,
    /// Contributing sources; length is the CC field.
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    /// Parses an RTP header (with CSRC list) from the front of `data`.
    ///
    /// # Errors
    /// - `RohcParsingError::NotEnoughData` - truncated fixed header or CSRC list
    /// - `RohcParsingError::InvalidFieldValue` - version is not 2
    pub fn parse(data: &[u8]) -> Result<RtpHeader, RohcParsingError> {
        if data.len() < RTP_MIN_HEADER_LENGTH {
            return Err(RohcParsingError::NotEnoughData {
                needed: RTP_MIN_HEADER_LENGTH,
                got: data.len(),
                context: ParseContext::RtpHeader,
            });
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(RohcParsingError::InvalidFieldValue {
                field: Field::RtpVersion,
                expected: RTP_VERSION as u32,
                got: version as u32,
            });
        }
        let csrc_count = (data[0] & 0x0F) as usize;
        let total_len = RTP_MIN_HEADER_LENGTH + csrc_count * 4;
        if data.len() < total_len {
            return Err(RohcParsingError::NotEnoughData {
                needed: total_len,
                got: data.len(),
                context: ParseContext::RtpHeader,
            });
        }

        let mut csrc = Vec::with_capacity(csrc_count);
        for i in 0..csrc_count {
            let offset = RTP_MIN_HEADER_LENGTH + i * 4;
            csrc.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
        }

        Ok(RtpHeader {
            padding: (data[0] >> 5) & 0x01 == 1,
            extension: (data[0] >> 4) & 0x01 == 1,
            marker: data[1] >> 7 == 1,
            payload_type: data[1] & 0x7F,
            sequence_number: SequenceNumber::new(u16::from_be_bytes([data[2], data[3]])),
            timestamp: Timestamp::new(u32::from_be_bytes([data[4], data[5], data[6], data[7]])),
            ssrc: Ssrc::new(u32::from_be_bytes([data[8], data[9], data[10], data[11]])),
            csrc,
        })
    }

    /// Total wire length of this header including the CSRC list.
    #[inline]
    pub fn wire_length(&self) -> usize {
        RTP_MIN_HEADER_LENGTH + self.csrc.len() * 4
    }

    /// Writes the header into `out`. Returns the bytes written.
    ///
    /// # Errors
    /// - `RohcBuildingError::BufferTooSmall` - `out` shorter than the header
    pub fn build(&self, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
        let needed = self.wire_length();
        if out.len() < needed {
            return Err(RohcBuildingError::BufferTooSmall {
                needed,
                available: out.len(),
                context: ParseContext::RtpHeader,
            });
        }
        out[0] = (RTP_VERSION << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc.len() as u8 & 0x0F);
        out[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        out[2..4].copy_from_slice(&self.sequence_number.value().to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.value().to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.value().to_be_bytes());
        for (i, csrc) in self.csrc.iter().enumerate() {
            let offset = RTP_MIN_HEADER_LENGTH + i * 4;
            out[offset..offset + 4].copy_from_slice(&csrc.to_be_bytes());
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RtpHeader {
        RtpHeader {
            padding: false,
            extension: false,
            marker: true,
            payload_type: 96,
            sequence_number: SequenceNumber::new(100),
            timestamp: Timestamp::new(16_000),
            ssrc: Ssrc::new(0xDEADBEEF),
            csrc: vec![],
        }
    }

    #[test]
    fn parse_build_round_trip() {
        let header = sample();
        let mut buf = [0u8; 12];
        header.build(&mut buf).unwrap();
        assert_eq!(RtpHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn parse_build_round_trip_with_csrc() {
        let mut header = sample();
        header.csrc = vec![0x11111111, 0x22222222];
        let mut buf = [0u8; 20];
        let len = header.build(&mut buf).unwrap();
        assert_eq!(len, 20);
        assert_eq!(RtpHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut buf = [0u8; 12];
        sample().build(&mut buf).unwrap();
        buf[0] = (buf[0] & 0x3F) | (1 << 6);
        assert!(RtpHeader::parse(&buf).is_err());
    }

    #[test]
    fn parse_rejects_truncated_csrc_list() {
        let mut header = sample();
        header.csrc = vec![1, 2, 3];
        let mut buf = [0u8; 24];
        header.build(&mut buf).unwrap();
        assert!(RtpHeader::parse(&buf[..16]).is_err());
    }
}
