//! CRC calculation for ROHC packet validation.
//!
//! Three polynomials are in use (RFC 3095 Section 5.9.1, RFC 5225
//! Section 6.6.9): CRC-3 over small compressed headers, CRC-7 over the larger
//! ones, CRC-8 over IR/IR-DYN content. All are reflected algorithms; the `crc`
//! crate's ROHC catalog entries carry the exact parameters (CRC-3 poly `0x3`
//! init `0x7`, CRC-7 poly `0x4F` init `0x7F`, CRC-8 poly `0x07` init `0xFF`)
//! with table-driven byte-wise evaluation.

use crc::{Crc, CRC_3_ROHC, CRC_7_ROHC, CRC_8_ROHC};
use std::fmt;

/// Pre-initialized CRC algorithm instances for reuse across packets.
pub struct CrcCalculators {
    crc3: Crc<u8>,
    crc7: Crc<u8>,
    crc8: Crc<u8>,
}

impl fmt::Debug for CrcCalculators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrcCalculators")
            .field("crc3", &format_args!("Crc<u8>(CRC_3_ROHC)"))
            .field("crc7", &format_args!("Crc<u8>(CRC_7_ROHC)"))
            .field("crc8", &format_args!("Crc<u8>(CRC_8_ROHC)"))
            .finish()
    }
}

impl CrcCalculators {
    /// Creates calculators for the three ROHC CRC algorithms.
    pub fn new() -> Self {
        Self {
            crc3: Crc::<u8>::new(&CRC_3_ROHC),
            crc7: Crc::<u8>::new(&CRC_7_ROHC),
            crc8: Crc::<u8>::new(&CRC_8_ROHC),
        }
    }

    /// 3-bit ROHC CRC, result in `0x00..=0x07`.
    #[inline]
    pub fn crc3(&self, input: &[u8]) -> u8 {
        self.crc3.checksum(input)
    }

    /// 7-bit ROHC CRC, result in `0x00..=0x7F`.
    #[inline]
    pub fn crc7(&self, input: &[u8]) -> u8 {
        self.crc7.checksum(input)
    }

    /// 8-bit ROHC CRC.
    #[inline]
    pub fn crc8(&self, input: &[u8]) -> u8 {
        self.crc8.checksum(input)
    }
}

impl Default for CrcCalculators {
    fn default() -> Self {
        Self::new()
    }
}
