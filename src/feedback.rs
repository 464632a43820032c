//! ROHC feedback element parsing and construction.
//!
//! FEEDBACK-1 is a single octet of SN LSBs and counts as an ACK. FEEDBACK-2
//! carries an ack type, an optional mode request, 12 SN bits and a list of
//! `(type, length)` options; each SN option appends eight more LSBs. Elements
//! may arrive wrapped in the `11110xxx` feedback packet type, with an Add-CID
//! octet (small CIDs) or an SDVL-coded CID (large CIDs) in front of the body.

use log::warn;

use crate::constants::{
    ADD_CID_PREFIX, ADD_CID_PREFIX_MASK, FEEDBACK_PREFIX, FEEDBACK_PREFIX_MASK, FEEDBACK_SIZE_MASK,
    SMALL_CID_MASK,
};
use crate::crc::CrcCalculators;
use crate::encodings::{sdvl_decode, sdvl_encode};
use crate::error::{Field, ParseContext, RohcBuildingError, RohcParsingError};
use crate::packet_defs::{CidType, OperMode};
use crate::types::ContextId;

/// Acknowledgement type carried in FEEDBACK-2 (RFC 3095, Section 5.7.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// Context is up to date.
    Ack,
    /// Dynamic context is damaged.
    Nack,
    /// Static context is damaged.
    StaticNack,
}

impl AckType {
    fn from_bits(bits: u8) -> Result<AckType, RohcParsingError> {
        match bits {
            0 => Ok(AckType::Ack),
            1 => Ok(AckType::Nack),
            2 => Ok(AckType::StaticNack),
            other => Err(RohcParsingError::InvalidFieldValue {
                field: Field::AckType,
                expected: 2,
                got: other as u32,
            }),
        }
    }

    fn bits(self) -> u8 {
        match self {
            AckType::Ack => 0,
            AckType::Nack => 1,
            AckType::StaticNack => 2,
        }
    }
}

/// Feedback option types (RFC 3095, Section 5.7.6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOption {
    Crc = 1,
    Reject = 2,
    SnNotValid = 3,
    Sn = 4,
    Clock = 5,
    Jitter = 6,
    Loss = 7,
}

/// One decoded feedback element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackUnit {
    /// CID the feedback refers to.
    pub cid: ContextId,
    /// Acknowledgement type; FEEDBACK-1 implies ACK.
    pub ack_type: AckType,
    /// Mode the peer asks the compressor to operate in.
    pub mode: Option<OperMode>,
    /// Acknowledged SN/MSN, as many LSBs as the element carried.
    pub msn: Option<u16>,
    /// Number of valid bits in `msn`.
    pub msn_bits: u8,
    /// SN-NOT-VALID option present: `msn` must be ignored.
    pub sn_not_valid: bool,
    /// REJECT option present: stop compressing this flow for a while.
    pub rejected: bool,
    /// LOSS option value, when present.
    pub loss: Option<u8>,
}

impl FeedbackUnit {
    /// True when the unit acknowledges a specific MSN usable for window
    /// advancement.
    pub fn usable_msn(&self) -> Option<u16> {
        if self.sn_not_valid { None } else { self.msn }
    }
}

/// Splits a transport buffer into feedback elements and parses each.
///
/// Accepts bare elements as well as `11110xxx`-wrapped ones, concatenated.
/// Elements whose CRC option fails verification are dropped with a warning.
///
/// # Errors
/// - `RohcParsingError` - structurally broken input (truncation, reserved
///   ack type, bad option length)
pub fn parse_feedback_stream(
    mut data: &[u8],
    cid_type: CidType,
    crc: &CrcCalculators,
) -> Result<Vec<FeedbackUnit>, RohcParsingError> {
    let mut units = Vec::new();
    while !data.is_empty() {
        let element;
        if data[0] & FEEDBACK_PREFIX_MASK == FEEDBACK_PREFIX {
            let code = (data[0] & FEEDBACK_SIZE_MASK) as usize;
            let (size, header_len) = if code == 0 {
                let size = *data.get(1).ok_or(RohcParsingError::NotEnoughData {
                    needed: 2,
                    got: data.len(),
                    context: ParseContext::FeedbackHeader,
                })? as usize;
                (size, 2)
            } else {
                (code, 1)
            };
            if data.len() < header_len + size {
                return Err(RohcParsingError::NotEnoughData {
                    needed: header_len + size,
                    got: data.len(),
                    context: ParseContext::FeedbackHeader,
                });
            }
            element = &data[header_len..header_len + size];
            data = &data[header_len + size..];
        } else {
            element = data;
            data = &[];
        }
        match parse_feedback_element(element, cid_type, crc) {
            Ok(Some(unit)) => units.push(unit),
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(units)
}

/// Parses one feedback element (CID prefix + FEEDBACK-1/2 body).
/// Returns `None` when a CRC option failed verification.
fn parse_feedback_element(
    element: &[u8],
    cid_type: CidType,
    crc: &CrcCalculators,
) -> Result<Option<FeedbackUnit>, RohcParsingError> {
    if element.is_empty() {
        return Err(RohcParsingError::NotEnoughData {
            needed: 1,
            got: 0,
            context: ParseContext::FeedbackHeader,
        });
    }

    let (cid, body) = match cid_type {
        CidType::Small => {
            if element[0] & ADD_CID_PREFIX_MASK == ADD_CID_PREFIX {
                (
                    ContextId::new((element[0] & SMALL_CID_MASK) as u16),
                    &element[1..],
                )
            } else {
                (ContextId::new(0), element)
            }
        }
        CidType::Large => {
            let (cid, consumed) = sdvl_decode(element)?;
            (ContextId::new(cid as u16), &element[consumed..])
        }
    };

    match body.len() {
        0 => Err(RohcParsingError::NotEnoughData {
            needed: 1,
            got: 0,
            context: ParseContext::FeedbackHeader,
        }),
        1 => Ok(Some(FeedbackUnit {
            cid,
            ack_type: AckType::Ack,
            mode: None,
            msn: Some(body[0] as u16),
            msn_bits: 8,
            sn_not_valid: false,
            rejected: false,
            loss: None,
        })),
        _ => parse_feedback2(cid, body, crc),
    }
}

fn parse_feedback2(
    cid: ContextId,
    body: &[u8],
    crc: &CrcCalculators,
) -> Result<Option<FeedbackUnit>, RohcParsingError> {
    let ack_type = AckType::from_bits(body[0] >> 6)?;
    let mode = OperMode::from_wire_code((body[0] >> 4) & 0x03);
    let mut msn: u32 = (((body[0] & 0x0F) as u32) << 8) | body[1] as u32;
    let mut msn_bits: u8 = 12;
    let mut sn_not_valid = false;
    let mut rejected = false;
    let mut loss = None;
    let mut crc_offset: Option<usize> = None;
    let mut crc_value = 0u8;

    let mut offset = 2;
    while offset < body.len() {
        let opt_type = body[offset] >> 4;
        let opt_len = (body[offset] & 0x0F) as usize;
        let value_start = offset + 1;
        if body.len() < value_start + opt_len {
            return Err(RohcParsingError::NotEnoughData {
                needed: value_start + opt_len,
                got: body.len(),
                context: ParseContext::FeedbackOption,
            });
        }
        let value = &body[value_start..value_start + opt_len];
        match opt_type {
            t if t == FeedbackOption::Crc as u8 => {
                if opt_len != 1 {
                    return Err(RohcParsingError::InvalidFieldValue {
                        field: Field::FeedbackOptionType,
                        expected: 1,
                        got: opt_len as u32,
                    });
                }
                crc_offset = Some(value_start);
                crc_value = value[0];
            }
            t if t == FeedbackOption::Reject as u8 => rejected = true,
            t if t == FeedbackOption::SnNotValid as u8 => sn_not_valid = true,
            t if t == FeedbackOption::Sn as u8 => {
                if opt_len != 1 {
                    return Err(RohcParsingError::InvalidFieldValue {
                        field: Field::FeedbackOptionType,
                        expected: 1,
                        got: opt_len as u32,
                    });
                }
                msn = (msn << 8) | value[0] as u32;
                msn_bits = msn_bits.saturating_add(8).min(16);
            }
            t if t == FeedbackOption::Loss as u8 => {
                loss = value.first().copied();
            }
            t if t == FeedbackOption::Clock as u8 || t == FeedbackOption::Jitter as u8 => {
                // Recognized, not acted on (RFC 3095 makes them advisory).
            }
            _ => {
                // Unknown options are skipped by length per RFC 3095 5.7.6.10.
            }
        }
        offset = value_start + opt_len;
    }

    if let Some(at) = crc_offset {
        let mut scratch = body.to_vec();
        scratch[at] = 0;
        let computed = crc.crc8(&scratch);
        if computed != crc_value {
            warn!(
                "feedback CRC mismatch on {}: computed {:#04x}, carried {:#04x}; element dropped",
                cid, computed, crc_value
            );
            return Ok(None);
        }
    }

    Ok(Some(FeedbackUnit {
        cid,
        ack_type,
        mode,
        msn: Some(msn as u16),
        msn_bits,
        sn_not_valid,
        rejected,
        loss,
    }))
}

/// Builds a FEEDBACK-1 element (with Add-CID / SDVL CID prefix as needed).
pub fn build_feedback1(cid: ContextId, sn_lsbs: u8, cid_type: CidType) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    push_cid_prefix(&mut out, cid, cid_type);
    out.push(sn_lsbs);
    out
}

/// Builds a FEEDBACK-2 element and a CRC option. A known MSN travels 16-bit
/// (bits 15..8 in the 12-bit base field, bits 7..0 appended by one SN
/// option); `None` sends the SN-NOT-VALID option instead.
pub fn build_feedback2(
    cid: ContextId,
    ack_type: AckType,
    mode: OperMode,
    msn: Option<u16>,
    crc: &CrcCalculators,
    cid_type: CidType,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    push_cid_prefix(&mut out, cid, cid_type);
    let body_start = out.len();

    match msn {
        Some(msn) => {
            // The SN option appends 8 LSBs to the base field; the receiver
            // computes (base << 8) | option.
            out.push((ack_type.bits() << 6) | (mode.wire_code() << 4));
            out.push((msn >> 8) as u8);
            out.push(((FeedbackOption::Sn as u8) << 4) | 1);
            out.push(msn as u8);
        }
        None => {
            out.push((ack_type.bits() << 6) | (mode.wire_code() << 4));
            out.push(0);
            out.push((FeedbackOption::SnNotValid as u8) << 4);
        }
    }

    // CRC option, value computed with its octet zeroed.
    out.push(((FeedbackOption::Crc as u8) << 4) | 1);
    out.push(0);
    let crc_at = out.len() - 1;
    let computed = crc.crc8(&out[body_start..]);
    out[crc_at] = computed;
    out
}

fn push_cid_prefix(out: &mut Vec<u8>, cid: ContextId, cid_type: CidType) {
    match cid_type {
        CidType::Small => {
            if cid.value() > 0 {
                out.push(ADD_CID_PREFIX | (cid.value() as u8 & SMALL_CID_MASK));
            }
        }
        CidType::Large => {
            let mut buf = [0u8; 4];
            let len = sdvl_encode(cid.value() as u32, &mut buf)
                .expect("CID fits SDVL by construction");
            out.extend_from_slice(&buf[..len]);
        }
    }
}

/// Wraps a feedback element in the `11110xxx` feedback packet type so it can
/// travel on a ROHC channel.
///
/// # Errors
/// - `RohcBuildingError::InvalidFieldValueForBuild` - element longer than 255
pub fn wrap_feedback(element: &[u8]) -> Result<Vec<u8>, RohcBuildingError> {
    if element.len() > 255 {
        return Err(RohcBuildingError::InvalidFieldValueForBuild {
            field: Field::BufferSize,
            value: element.len() as u32,
            max_bits: 8,
        });
    }
    let mut out = Vec::with_capacity(element.len() + 2);
    if element.len() < 8 {
        out.push(FEEDBACK_PREFIX | element.len() as u8);
    } else {
        out.push(FEEDBACK_PREFIX);
        out.push(element.len() as u8);
    }
    out.extend_from_slice(element);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc() -> CrcCalculators {
        CrcCalculators::new()
    }

    #[test]
    fn feedback1_round_trip_small_cid() {
        let element = build_feedback1(ContextId::new(3), 0x42, CidType::Small);
        let units = parse_feedback_stream(&element, CidType::Small, &crc()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].cid, 3);
        assert_eq!(units[0].ack_type, AckType::Ack);
        assert_eq!(units[0].msn, Some(0x42));
        assert_eq!(units[0].msn_bits, 8);
    }

    #[test]
    fn feedback1_cid0_is_single_octet() {
        let element = build_feedback1(ContextId::new(0), 0x10, CidType::Small);
        assert_eq!(element, vec![0x10]);
    }

    #[test]
    fn feedback2_round_trip_with_crc_and_sn_option() {
        let element = build_feedback2(
            ContextId::new(1),
            AckType::Nack,
            OperMode::Optimistic,
            Some(0x1230),
            &crc(),
            CidType::Small,
        );
        let units = parse_feedback_stream(&element, CidType::Small, &crc()).unwrap();
        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert_eq!(unit.cid, 1);
        assert_eq!(unit.ack_type, AckType::Nack);
        assert_eq!(unit.mode, Some(OperMode::Optimistic));
        assert_eq!(unit.msn_bits, 16);
        assert_eq!(unit.msn, Some(0x1230));
        assert!(!unit.sn_not_valid);
    }

    #[test]
    fn feedback2_crc_mismatch_drops_element() {
        let mut element = build_feedback2(
            ContextId::new(0),
            AckType::Ack,
            OperMode::Optimistic,
            Some(7),
            &crc(),
            CidType::Small,
        );
        let last = element.len() - 1;
        element[last] ^= 0xFF;
        let units = parse_feedback_stream(&element, CidType::Small, &crc()).unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn wrapped_elements_parse_and_concatenate() {
        let a = build_feedback1(ContextId::new(1), 5, CidType::Small);
        let b = build_feedback1(ContextId::new(2), 6, CidType::Small);
        let mut stream = wrap_feedback(&a).unwrap();
        stream.extend(wrap_feedback(&b).unwrap());
        let units = parse_feedback_stream(&stream, CidType::Small, &crc()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].cid, 1);
        assert_eq!(units[1].cid, 2);
    }

    #[test]
    fn large_cid_uses_sdvl_prefix() {
        let element = build_feedback1(ContextId::new(300), 9, CidType::Large);
        let units = parse_feedback_stream(&element, CidType::Large, &crc()).unwrap();
        assert_eq!(units[0].cid, 300);
    }

    #[test]
    fn reserved_ack_type_is_malformed() {
        // ack_type bits 11 are reserved for parsability.
        let body = vec![0b1100_0000, 0x00];
        assert!(parse_feedback_stream(&body, CidType::Small, &crc()).is_err());
    }

    #[test]
    fn unknown_options_are_skipped() {
        let mut body = vec![0b0000_0000, 0x05];
        body.push(0x91); // option type 9, length 1
        body.push(0xAA);
        let units = parse_feedback_stream(&body, CidType::Small, &crc()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].msn, Some(5));
    }

    #[test]
    fn sn_not_valid_suppresses_msn() {
        let mut body = vec![0b0000_0000, 0x05];
        body.push(((FeedbackOption::SnNotValid as u8) << 4) | 0);
        let units = parse_feedback_stream(&body, CidType::Small, &crc()).unwrap();
        assert!(units[0].sn_not_valid);
        assert_eq!(units[0].usable_msn(), None);
    }

    #[test]
    fn parsing_same_element_twice_yields_identical_units() {
        let element = build_feedback2(
            ContextId::new(2),
            AckType::StaticNack,
            OperMode::Reliable,
            Some(0x0777),
            &crc(),
            CidType::Small,
        );
        let first = parse_feedback_stream(&element, CidType::Small, &crc()).unwrap();
        let second = parse_feedback_stream(&element, CidType::Small, &crc()).unwrap();
        assert_eq!(first, second);
    }
}
