//! Profile registry and engine-level configuration types.

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Supported ROHC profile identifiers.
///
/// Values are the 16-bit identifiers from the IANA ROHC profile registry.
/// IR packets carry only the eight least significant bits; see
/// [`RohcProfile::lsb_octet`] and [`RohcProfile::from_lsb_octet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RohcProfile {
    /// Uncompressed passthrough (0x0000).
    Uncompressed,
    /// RTP/UDP/IP (0x0001).
    Rtp,
    /// UDP/IP (0x0002).
    Udp,
    /// ESP/IP (0x0003).
    Esp,
    /// IP-only (0x0004).
    Ip,
    /// UDP-Lite/IP (0x0008).
    UdpLite,
    /// ROHCv2 UDP/IP (0x0102).
    V2Udp,
    /// ROHCv2 IP-only (0x0104).
    V2Ip,
    /// Registered identifier without an implementation in this crate.
    Unknown(u16),
}

impl RohcProfile {
    /// The eight least significant bits, as carried in IR packets.
    #[inline]
    pub fn lsb_octet(self) -> u8 {
        u16::from(self) as u8
    }

    /// Resolves an IR profile octet against a set of enabled profiles.
    ///
    /// The octet is ambiguous between a v1 profile and its ROHCv2 counterpart;
    /// configuration guarantees at most one of each pair is enabled on a
    /// channel, so the first enabled profile with a matching LSB wins.
    pub fn from_lsb_octet(octet: u8, enabled: &[RohcProfile]) -> Option<RohcProfile> {
        enabled.iter().copied().find(|p| p.lsb_octet() == octet)
    }

    /// True for the RFC 5225 (ROHCv2) profiles.
    #[inline]
    pub fn is_rohcv2(self) -> bool {
        matches!(self, RohcProfile::V2Udp | RohcProfile::V2Ip) || u16::from(self) >= 0x0100
    }
}

impl From<u16> for RohcProfile {
    fn from(value: u16) -> Self {
        match value {
            PROFILE_ID_UNCOMPRESSED => RohcProfile::Uncompressed,
            PROFILE_ID_RTP => RohcProfile::Rtp,
            PROFILE_ID_UDP => RohcProfile::Udp,
            PROFILE_ID_ESP => RohcProfile::Esp,
            PROFILE_ID_IP => RohcProfile::Ip,
            PROFILE_ID_UDPLITE => RohcProfile::UdpLite,
            PROFILE_ID_V2_UDP => RohcProfile::V2Udp,
            PROFILE_ID_V2_IP => RohcProfile::V2Ip,
            other => RohcProfile::Unknown(other),
        }
    }
}

impl From<RohcProfile> for u16 {
    fn from(profile: RohcProfile) -> Self {
        match profile {
            RohcProfile::Uncompressed => PROFILE_ID_UNCOMPRESSED,
            RohcProfile::Rtp => PROFILE_ID_RTP,
            RohcProfile::Udp => PROFILE_ID_UDP,
            RohcProfile::Esp => PROFILE_ID_ESP,
            RohcProfile::Ip => PROFILE_ID_IP,
            RohcProfile::UdpLite => PROFILE_ID_UDPLITE,
            RohcProfile::V2Udp => PROFILE_ID_V2_UDP,
            RohcProfile::V2Ip => PROFILE_ID_V2_IP,
            RohcProfile::Unknown(value) => value,
        }
    }
}

/// CID addressing scheme negotiated for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CidType {
    /// CIDs 0..=15, carried in an Add-CID octet.
    Small,
    /// CIDs 0..=16383, carried SDVL-coded after the packet type octet.
    Large,
}

impl CidType {
    /// Highest CID value addressable under this scheme.
    #[inline]
    pub fn max_cid(self) -> u16 {
        match self {
            CidType::Small => SMALL_CID_MAX,
            CidType::Large => LARGE_CID_MAX,
        }
    }
}

/// ROHC operating mode of a channel (RFC 3095, Section 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperMode {
    /// Unidirectional: no feedback channel.
    Unidirectional,
    /// Bidirectional Optimistic: sparse feedback.
    Optimistic,
    /// Bidirectional Reliable: feedback on every context update.
    Reliable,
}

impl OperMode {
    /// Two-bit mode code used in FEEDBACK-2.
    #[inline]
    pub fn wire_code(self) -> u8 {
        match self {
            OperMode::Unidirectional => 1,
            OperMode::Optimistic => 2,
            OperMode::Reliable => 3,
        }
    }

    /// Decodes the FEEDBACK-2 mode field; 0 means "no mode change requested".
    #[inline]
    pub fn from_wire_code(code: u8) -> Option<OperMode> {
        match code {
            1 => Some(OperMode::Unidirectional),
            2 => Some(OperMode::Optimistic),
            3 => Some(OperMode::Reliable),
            _ => None,
        }
    }
}

/// Decompressor context confidence, shared across profiles for feedback
/// decisions at the engine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecompState {
    /// No context: only IR acceptable.
    #[default]
    NoContext,
    /// Static chain known, dynamic chain stale.
    StaticContext,
    /// Fully synchronized.
    FullContext,
}

/// Classification of an IPv4 Identification field (RFC 5225, Section 6.3.2;
/// the same split governs which v1 packets must carry IP-ID bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpIdBehavior {
    /// IP-ID increments with the MSN; only the offset is transmitted.
    #[default]
    Sequential,
    /// As `Sequential` with the sender storing the field little-endian.
    SequentialSwapped,
    /// IP-ID is constant zero; nothing is transmitted.
    Zero,
    /// IP-ID is unpredictable; carried verbatim in the irregular chain.
    Random,
}

impl IpIdBehavior {
    /// Two-bit wire code used in dynamic chains.
    #[inline]
    pub fn wire_code(self) -> u8 {
        match self {
            IpIdBehavior::Sequential => 0,
            IpIdBehavior::SequentialSwapped => 1,
            IpIdBehavior::Random => 2,
            IpIdBehavior::Zero => 3,
        }
    }

    /// Decodes a two-bit wire code.
    #[inline]
    pub fn from_wire_code(code: u8) -> IpIdBehavior {
        match code & 0x03 {
            0 => IpIdBehavior::Sequential,
            1 => IpIdBehavior::SequentialSwapped,
            2 => IpIdBehavior::Random,
            _ => IpIdBehavior::Zero,
        }
    }

    /// Classifies from two consecutive observations and the MSN distance
    /// between them.
    pub fn classify(previous: u16, current: u16, msn_delta: u16) -> IpIdBehavior {
        if previous == 0 && current == 0 {
            IpIdBehavior::Zero
        } else if current.wrapping_sub(previous) == msn_delta {
            IpIdBehavior::Sequential
        } else if current.swap_bytes().wrapping_sub(previous.swap_bytes()) == msn_delta {
            IpIdBehavior::SequentialSwapped
        } else {
            IpIdBehavior::Random
        }
    }

    /// True for the behaviors whose IP-ID tracks the MSN.
    #[inline]
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped
        )
    }
}

/// Optional engine behaviors, a plain bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Features(pub u32);

impl Features {
    /// No optional behavior enabled.
    pub const NONE: Features = Features(0);
    /// Periodic IR refresh driven by the injected clock in addition to the
    /// packet counter.
    pub const TIME_BASED_REFRESHES: Features = Features(1 << 0);
    /// Skip verification of inbound IPv4 header checksums.
    pub const NO_IP_CHECKSUMS: Features = Features(1 << 1);
    /// Pre-erratum-2703 control CRC: include IPv6 IP-ID behaviors.
    pub const CRC3_COVERS_IPV6_BEHAVIOR: Features = Features(1 << 2);
    /// Log a hex dump of every packet processed.
    pub const DUMP_PACKETS: Features = Features(1 << 3);

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two feature sets.
    #[inline]
    pub fn with(self, other: Features) -> Features {
        Features(self.0 | other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_round_trip_through_u16() {
        for profile in [
            RohcProfile::Uncompressed,
            RohcProfile::Rtp,
            RohcProfile::Udp,
            RohcProfile::Esp,
            RohcProfile::Ip,
            RohcProfile::UdpLite,
            RohcProfile::V2Udp,
            RohcProfile::V2Ip,
        ] {
            assert_eq!(RohcProfile::from(u16::from(profile)), profile);
        }
        assert_eq!(
            RohcProfile::from(0x0042u16),
            RohcProfile::Unknown(0x0042)
        );
    }

    #[test]
    fn lsb_octet_resolution_prefers_enabled_profile() {
        let v1_set = [RohcProfile::Rtp, RohcProfile::Udp, RohcProfile::Ip];
        assert_eq!(
            RohcProfile::from_lsb_octet(0x02, &v1_set),
            Some(RohcProfile::Udp)
        );

        let v2_set = [RohcProfile::V2Udp, RohcProfile::V2Ip];
        assert_eq!(
            RohcProfile::from_lsb_octet(0x02, &v2_set),
            Some(RohcProfile::V2Udp)
        );
        assert_eq!(RohcProfile::from_lsb_octet(0x07, &v2_set), None);
    }

    #[test]
    fn cid_type_bounds() {
        assert_eq!(CidType::Small.max_cid(), 15);
        assert_eq!(CidType::Large.max_cid(), 16383);
    }

    #[test]
    fn oper_mode_wire_codes_round_trip() {
        for mode in [
            OperMode::Unidirectional,
            OperMode::Optimistic,
            OperMode::Reliable,
        ] {
            assert_eq!(OperMode::from_wire_code(mode.wire_code()), Some(mode));
        }
        assert_eq!(OperMode::from_wire_code(0), None);
    }

    #[test]
    fn ip_id_behavior_classification() {
        assert_eq!(IpIdBehavior::classify(0, 0, 1), IpIdBehavior::Zero);
        assert_eq!(IpIdBehavior::classify(100, 101, 1), IpIdBehavior::Sequential);
        assert_eq!(IpIdBehavior::classify(100, 103, 3), IpIdBehavior::Sequential);
        // 0x3412 -> 0x3512 is +1 once both are byte-swapped.
        assert_eq!(
            IpIdBehavior::classify(0x1234, 0x1235, 1),
            IpIdBehavior::Sequential
        );
        assert_eq!(
            IpIdBehavior::classify(0x3412, 0x3512, 1),
            IpIdBehavior::SequentialSwapped
        );
        assert_eq!(IpIdBehavior::classify(7, 912, 1), IpIdBehavior::Random);
    }

    #[test]
    fn ip_id_behavior_wire_codes_round_trip() {
        for behavior in [
            IpIdBehavior::Sequential,
            IpIdBehavior::SequentialSwapped,
            IpIdBehavior::Zero,
            IpIdBehavior::Random,
        ] {
            assert_eq!(
                IpIdBehavior::from_wire_code(behavior.wire_code()),
                behavior
            );
        }
    }

    #[test]
    fn feature_bitset_operations() {
        let f = Features::TIME_BASED_REFRESHES.with(Features::NO_IP_CHECKSUMS);
        assert!(f.contains(Features::TIME_BASED_REFRESHES));
        assert!(f.contains(Features::NO_IP_CHECKSUMS));
        assert!(!f.contains(Features::DUMP_PACKETS));
        assert!(Features::NONE.contains(Features::NONE));
    }
}
