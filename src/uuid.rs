//! Bluetooth UUIDs ([Vol 3] Part B, Section 2.5.1).
//!
//! The backend reports every identifier as a string. [`Uuid`] keeps whichever
//! width it was given, but all comparisons are made on the 128-bit expansion,
//! so a 16-bit alias and its full form are the same identifier.

#![allow(clippy::use_self)]

use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub use consts::*;

mod consts;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// Length of the canonical `8-4-4-4-12` string form.
const CANONICAL_LEN: usize = 36;

/// Error returned when a UUID string is malformed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid UUID format: {0:?}")]
pub struct ParseError(String);

/// 16-, 32-, or 128-bit UUID.
#[derive(Clone, Copy)]
pub enum Uuid {
    /// Bluetooth SIG 16-bit alias.
    Uuid16(u16),
    /// Bluetooth SIG 32-bit alias.
    Uuid32(u32),
    /// Full 128-bit value.
    Uuid128(u128),
}

impl Uuid {
    /// Creates a UUID from a 16-bit SIG alias.
    #[inline]
    #[must_use]
    pub const fn from_u16(v: u16) -> Self {
        Self::Uuid16(v)
    }

    /// Creates a UUID from a 32-bit SIG alias.
    #[inline]
    #[must_use]
    pub const fn from_u32(v: u32) -> Self {
        Self::Uuid32(v)
    }

    /// Creates a UUID from a full 128-bit value.
    #[inline]
    #[must_use]
    pub const fn from_u128(v: u128) -> Self {
        Self::Uuid128(v)
    }

    /// Parses a canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` string or a
    /// short 4 or 8 hex digit alias, optionally prefixed with `0x`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let err = || ParseError(s.to_owned());
        let t = s.trim();
        if t.len() == CANONICAL_LEN {
            let b = t.as_bytes();
            if [8, 13, 18, 23].iter().any(|&i| b[i] != b'-') {
                return Err(err());
            }
            let hex: String = t.chars().filter(|&c| c != '-').collect();
            return hex_value(&hex, 32).map(Self::Uuid128).ok_or_else(err);
        }
        let t = (t.strip_prefix("0x").or_else(|| t.strip_prefix("0X"))).unwrap_or(t);
        match t.len() {
            4 => hex_value(t, 4).map(|v| Self::Uuid16(v as u16)),
            8 => hex_value(t, 8).map(|v| Self::Uuid32(v as u32)),
            _ => None,
        }
        .ok_or_else(err)
    }

    /// Returns the 128-bit expansion of the UUID using the Bluetooth base UUID.
    #[inline]
    #[must_use]
    pub const fn expand(self) -> u128 {
        match self {
            Self::Uuid16(v) => (v as u128) << SHIFT | BASE,
            Self::Uuid32(v) => (v as u128) << SHIFT | BASE,
            Self::Uuid128(v) => v,
        }
    }

    /// Returns the 16-bit alias or [`None`] if the UUID is not an assigned
    /// 16-bit SIG UUID. This holds for both short and full representations.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_u16(self) -> Option<u16> {
        let v = self.expand();
        if v & MASK_16 == BASE {
            Some((v >> SHIFT) as u16)
        } else {
            None
        }
    }

    /// Returns the 32-bit alias or [`None`] if the UUID is not derived from
    /// the Bluetooth base UUID.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_u32(self) -> Option<u32> {
        let v = self.expand();
        if v & MASK_32 == BASE {
            Some((v >> SHIFT) as u32)
        } else {
            None
        }
    }

    /// Returns the expanded UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.expand().to_le_bytes()
    }
}

/// Parses `n` hex digits. [`u128::from_str_radix`] alone would also accept a
/// leading sign.
fn hex_value(s: &str, n: usize) -> Option<u128> {
    (s.len() == n && s.bytes().all(|c| c.is_ascii_hexdigit()))
        .then(|| u128::from_str_radix(s, 16).ok())
        .flatten()
}

impl FromStr for Uuid {
    type Err = ParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = ();

    /// Decodes a little-endian wire representation.
    fn try_from(v: &[u8]) -> Result<Self, Self::Error> {
        match *v {
            [a, b] => Ok(Self::Uuid16(u16::from_le_bytes([a, b]))),
            [a, b, c, d] => Ok(Self::Uuid32(u32::from_le_bytes([a, b, c, d]))),
            _ => <[u8; 16]>::try_from(v)
                .map(|b| Self::Uuid128(u128::from_le_bytes(b)))
                .map_err(|_| ()),
        }
    }
}

impl PartialEq for Uuid {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.expand() == other.expand()
    }
}

impl Eq for Uuid {}

impl Hash for Uuid {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expand().hash(state);
    }
}

impl PartialOrd for Uuid {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uuid {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.expand().cmp(&other.expand())
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            Display::fmt(self, f)
        }
    }
}

impl Display for Uuid {
    /// Always renders the full canonical form, which is also the form used by
    /// the backend.
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = self.expand();
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            (v & ((1 << 48) - 1)) as u64
        )
    }
}

impl From<u16> for Uuid {
    #[inline]
    fn from(v: u16) -> Self {
        Self::Uuid16(v)
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.expand()
    }
}

/// Defines a `repr(u16)` enum of assigned 16-bit UUIDs with conversions into
/// [`Uuid`].
macro_rules! uuid16_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $typ:ident {
            $($(#[$doc:meta])* $item:ident = $uuid:literal,)+
        }
    ) => {
        $(#[$outer])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            ::num_enum::IntoPrimitive,
            ::num_enum::TryFromPrimitive,
            ::strum::Display,
        )]
        #[cfg_attr(test, derive(enum_iterator::Sequence))]
        #[non_exhaustive]
        #[repr(u16)]
        $vis enum $typ {
            $($(#[$doc])* $item = $uuid,)+
        }

        impl $typ {
            /// Returns the `Uuid` representation of the variant.
            #[inline]
            #[must_use]
            pub const fn uuid(self) -> $crate::uuid::Uuid {
                $crate::uuid::Uuid::from_u16(self as _)
            }

            /// Returns the variant matching `u`, if any.
            #[inline]
            #[must_use]
            pub fn of(u: $crate::uuid::Uuid) -> ::core::option::Option<Self> {
                u.as_u16().and_then(|v| Self::try_from(v).ok())
            }
        }

        impl ::core::cmp::PartialEq<$crate::uuid::Uuid> for $typ {
            #[inline(always)]
            fn eq(&self, rhs: &$crate::uuid::Uuid) -> bool {
                self.uuid() == *rhs
            }
        }

        impl ::core::cmp::PartialEq<$typ> for $crate::uuid::Uuid {
            #[inline(always)]
            fn eq(&self, rhs: &$typ) -> bool {
                *self == rhs.uuid()
            }
        }

        impl ::core::convert::From<$typ> for $crate::uuid::Uuid {
            #[inline]
            fn from(v: $typ) -> Self {
                v.uuid()
            }
        }
    };
}
use uuid16_enum;
