//! Device addresses.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Error returned when an address string is malformed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid device address: {0:?}")]
pub struct ParseError(String);

/// Device address type reported by the `AddressType` property
/// ([Vol 6] Part B, Section 1.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddrType {
    #[default]
    Public,
    Random,
}

impl AddrType {
    /// Returns whether this is a public device address.
    #[inline(always)]
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

/// 48-bit device address stored in little-endian byte order.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Returns the path segment that BlueZ uses for this device, e.g.
    /// `dev_AA_BB_CC_DD_EE_FF`.
    #[must_use]
    pub fn dev_segment(self) -> String {
        format!("dev_{}", self.to_string().replace(':', "_"))
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for RawAddr {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl FromStr for RawAddr {
    type Err = ParseError;

    /// Parses the `XX:XX:XX:XX:XX:XX` form, most significant byte first
    /// ([Vol 3] Part C, Section 3.2.1.3).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError(s.to_owned());
        let mut v = [0; 6];
        let mut it = s.split(':');
        for b in v.iter_mut().rev() {
            let p = it.next().ok_or_else(err)?;
            if p.len() != 2 || !p.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(err());
            }
            *b = u8::from_str_radix(p, 16).map_err(|_| err())?;
        }
        match it.next() {
            None => Ok(Self(v)),
            Some(_) => Err(err()),
        }
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let a: RawAddr = "AA:BB:CC:DD:EE:0f".parse().unwrap();
        assert_eq!(a.as_ref(), &[0x0F, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(a.to_string(), "AA:BB:CC:DD:EE:0F");
        assert_eq!(a.dev_segment(), "dev_AA_BB_CC_DD_EE_0F");
        for s in ["", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:FF:00", "AA:BB:CC:DD:EE:F", "+A:BB:CC:DD:EE:FF"] {
            assert!(s.parse::<RawAddr>().is_err(), "{s:?}");
        }
    }

    #[test]
    fn addr_type() {
        assert_eq!("public".parse::<AddrType>(), Ok(AddrType::Public));
        assert_eq!("random".parse::<AddrType>(), Ok(AddrType::Random));
        assert!("other".parse::<AddrType>().is_err());
        assert_eq!(AddrType::Random.to_string(), "random");
    }
}
