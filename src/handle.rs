use std::fmt::{Debug, Display, Formatter};
use std::ops::{Bound, RangeBounds};

use crate::util::name_of;

/// Attribute handle ([Vol 3] Part F, Section 3.2.2).
///
/// Handles derived from object paths are never validated against the ATT
/// rules, so `0x0000` is representable here.
#[derive(
    Clone,
    Copy,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Handle(u16);

impl Handle {
    /// Lowest valid handle.
    pub const MIN: Self = Self(0x0001);
    /// Highest valid handle.
    pub const MAX: Self = Self(0xFFFF);

    /// Wraps a raw handle.
    #[inline(always)]
    #[must_use]
    pub const fn new(h: u16) -> Self {
        Self(h)
    }

    /// Returns the next handle or `None` if the maximum handle was reached.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(h) => Some(Self(h)),
            None => None,
        }
    }

    /// Returns the raw handle value.
    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl Debug for Handle {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#06X})", name_of!(Handle), self.0)
    }
}

impl Display for Handle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl From<u16> for Handle {
    #[inline(always)]
    fn from(h: u16) -> Self {
        Self(h)
    }
}

impl From<Handle> for u16 {
    #[inline(always)]
    fn from(h: Handle) -> Self {
        h.0
    }
}

impl PartialEq<u16> for Handle {
    #[inline(always)]
    fn eq(&self, other: &u16) -> bool {
        self.0 == *other
    }
}

/// Inclusive range of attribute handles. This is a `Copy` version of
/// `RangeInclusive<Handle>`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub struct HandleRange {
    start: Handle,
    end: Handle,
}

impl HandleRange {
    /// Handle range that includes all possible handles.
    pub const ALL: Self = Self {
        start: Handle::MIN,
        end: Handle::MAX,
    };

    /// Creates a new handle range `start..=end`. Returns `None` if
    /// `end < start`.
    #[inline]
    pub fn new(start: impl Into<Handle>, end: impl Into<Handle>) -> Option<Self> {
        let (start, end) = (start.into(), end.into());
        (start <= end).then_some(Self { start, end })
    }

    /// Returns the starting handle.
    #[inline(always)]
    #[must_use]
    pub const fn start(self) -> Handle {
        self.start
    }

    /// Returns the ending handle.
    #[inline(always)]
    #[must_use]
    pub const fn end(self) -> Handle {
        self.end
    }
}

impl RangeBounds<Handle> for HandleRange {
    #[inline]
    fn start_bound(&self) -> Bound<&Handle> {
        Bound::Included(&self.start)
    }

    #[inline]
    fn end_bound(&self) -> Bound<&Handle> {
        Bound::Included(&self.end)
    }

    #[inline]
    fn contains<U>(&self, item: &U) -> bool
    where
        Handle: PartialOrd<U>,
        U: ?Sized + PartialOrd<Handle>,
    {
        self.start <= *item && *item <= self.end
    }
}

impl Default for HandleRange {
    /// Returns a handle range that includes all possible handles.
    #[inline(always)]
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range() {
        let r = HandleRange::new(0x0000, 0x00FF).unwrap();
        assert!(r.contains(&Handle::new(0)));
        assert!(r.contains(&Handle::new(0xFF)));
        assert!(!r.contains(&Handle::new(0x100)));
        assert!(HandleRange::new(5, 4).is_none());
        assert_eq!(HandleRange::default(), HandleRange::ALL);
    }

    #[test]
    fn fmt() {
        assert_eq!(format!("{:?}", Handle::new(3)), "Handle(0x0003)");
        assert_eq!(Handle::new(0x2A).to_string(), "0x002A");
        assert_eq!(Handle::MAX.next(), None);
        assert_eq!(Handle::new(3).next(), Some(Handle::new(4)));
    }
}
