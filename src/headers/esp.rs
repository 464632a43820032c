//! ESP header parsing and rebuilding.
//!
//! Only the cleartext prefix (SPI and sequence number) is visible to the
//! compressor; everything after it is opaque payload.

use serde::{Deserialize, Serialize};

use crate::constants::ESP_HEADER_LENGTH;
use crate::error::{ParseContext, RohcBuildingError, RohcParsingError};

/// The 8-byte cleartext ESP prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspHeader {
    /// Security Parameters Index.
    pub spi: u32,
    /// ESP sequence number.
    pub sequence_number: u32,
}

impl EspHeader {
    /// Parses the ESP prefix from the front of `data`.
    ///
    /// # Errors
    /// - `RohcParsingError::NotEnoughData` - fewer than 8 bytes
    pub fn parse(data: &[u8]) -> Result<EspHeader, RohcParsingError> {
        if data.len() < ESP_HEADER_LENGTH {
            return Err(RohcParsingError::NotEnoughData {
                needed: ESP_HEADER_LENGTH,
                got: data.len(),
                context: ParseContext::EspHeader,
            });
        }
        Ok(EspHeader {
            spi: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            sequence_number: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }

    /// Writes the prefix into `out`. Returns the bytes written (always 8).
    ///
    /// # Errors
    /// - `RohcBuildingError::BufferTooSmall` - `out` shorter than 8 bytes
    pub fn build(&self, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
        if out.len() < ESP_HEADER_LENGTH {
            return Err(RohcBuildingError::BufferTooSmall {
                needed: ESP_HEADER_LENGTH,
                available: out.len(),
                context: ParseContext::EspHeader,
            });
        }
        out[0..4].copy_from_slice(&self.spi.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        Ok(ESP_HEADER_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_round_trip() {
        let header = EspHeader {
            spi: 0xDEADBEEF,
            sequence_number: 42,
        };
        let mut buf = [0u8; 8];
        header.build(&mut buf).unwrap();
        assert_eq!(EspHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(EspHeader::parse(&[0u8; 4]).is_err());
    }
}
