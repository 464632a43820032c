//! Core type definitions for the ROHC engines.
//!
//! Provides zero-cost newtypes so that the many small integers flowing through
//! the compressor (CIDs, sequence numbers, timestamps, IP-IDs) cannot be mixed
//! up at compile time. All wrappers are `#[repr(transparent)]`.

use std::fmt;
use std::ops::{Add, AddAssign, Deref, Sub};

use serde::{Deserialize, Serialize};

/// Generates a ROHC field newtype with the shared trait surface.
macro_rules! field_newtype {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty) => $prefix:literal
        $(, extra: { $($extra:tt)* })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[derive(Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Creates a new instance.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Raw value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }

            /// Cast to u64 for W-LSB arithmetic.
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            /// Wrapping addition of a raw increment.
            #[inline]
            pub const fn wrapping_add(self, rhs: $inner) -> Self {
                Self(self.0.wrapping_add(rhs))
            }

            /// Wrapping difference to another value of the same field.
            #[inline]
            pub const fn wrapping_sub(self, rhs: Self) -> $inner {
                self.0.wrapping_sub(rhs.0)
            }

            $($($extra)*)?
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl PartialEq<$inner> for $name {
            #[inline]
            fn eq(&self, other: &$inner) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for $inner {
            #[inline]
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl PartialOrd<$inner> for $name {
            #[inline]
            fn partial_cmp(&self, other: &$inner) -> Option<std::cmp::Ordering> {
                self.0.partial_cmp(other)
            }
        }

        impl Add<$inner> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: $inner) -> Self::Output {
                self.wrapping_add(rhs)
            }
        }

        impl AddAssign<$inner> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: $inner) {
                *self = self.wrapping_add(rhs);
            }
        }

        impl Sub<Self> for $name {
            type Output = $inner;

            #[inline]
            fn sub(self, rhs: Self) -> Self::Output {
                self.wrapping_sub(rhs)
            }
        }
    };
}

field_newtype!(
    /// Context identifier for a compression or decompression flow.
    ///
    /// Small CID space is 0..=15, large CID space 0..=16383; the bound in
    /// force is decided by the engine's [`CidType`](crate::packet_defs::CidType).
    ContextId(u16) => "CID"
);

field_newtype!(
    /// Master Sequence Number driving W-LSB decoding of every changing field.
    ///
    /// For the RTP profile this is the RTP sequence number; for the other
    /// profiles it is generated by the compressor (or taken from the ESP
    /// sequence number).
    Msn(u16) => "MSN",
    extra: {
        /// Forward distance from `older` to `self` modulo 2^16.
        #[inline]
        pub const fn distance_from(self, older: Msn) -> u16 {
            self.0.wrapping_sub(older.0)
        }
    }
);

field_newtype!(
    /// RTP sequence number.
    SequenceNumber(u16) => "SN"
);

field_newtype!(
    /// RTP timestamp.
    Timestamp(u32) => "TS",
    extra: {
        /// Wrapping difference `self - earlier` modulo 2^32.
        #[inline]
        pub const fn wrapping_diff(self, earlier: Timestamp) -> u32 {
            self.0.wrapping_sub(earlier.0)
        }
    }
);

field_newtype!(
    /// RTP synchronization source identifier.
    Ssrc(u32) => "SSRC"
);

field_newtype!(
    /// IPv4 Identification field.
    IpId(u16) => "IP-ID",
    extra: {
        /// Byte-swapped view, used by the `SEQ_SWAP` IP-ID behavior.
        #[inline]
        pub const fn swapped(self) -> IpId {
            IpId(self.0.swap_bytes())
        }
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_wrapping_arithmetic() {
        let sn = SequenceNumber::new(u16::MAX);
        assert_eq!(sn.wrapping_add(1), 0);
        assert_eq!(SequenceNumber::new(3) - SequenceNumber::new(1), 2);
        assert_eq!(SequenceNumber::new(0) - SequenceNumber::new(u16::MAX), 1);
    }

    #[test]
    fn msn_distance_wraps() {
        assert_eq!(Msn::new(2).distance_from(Msn::new(0xFFFE)), 4);
        assert_eq!(Msn::new(100).distance_from(Msn::new(100)), 0);
    }

    #[test]
    fn timestamp_wrapping_diff() {
        let a = Timestamp::new(100);
        let b = Timestamp::new(4_294_967_200);
        assert_eq!(a.wrapping_diff(b), 196);
    }

    #[test]
    fn ip_id_swap() {
        assert_eq!(IpId::new(0x1234).swapped(), IpId::new(0x3412));
        assert_eq!(IpId::new(0x1234).swapped().swapped(), 0x1234);
    }

    #[test]
    fn comparisons_against_raw_values() {
        let cid = ContextId::new(7);
        assert_eq!(cid, 7u16);
        assert!(cid < 8);
        assert_eq!(7u16, cid);
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(format!("{}", ContextId::new(3)), "CID3");
        assert_eq!(format!("{}", Msn::new(10)), "MSN10");
        assert_eq!(format!("{}", Timestamp::new(160)), "TS160");
    }
}
