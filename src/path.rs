//! Object paths and the handle mapping derived from them.
//!
//! BlueZ names GATT objects `<adapter>/dev_XX_XX_XX_XX_XX_XX/serviceNNNN/charNNNN/descNNNN`
//! where each `NNNN` is the ATT handle of the attribute in hex. This is the
//! only place where the flat handle space is reconstructed from the object
//! hierarchy.

use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use crate::addr::RawAddr;
use crate::handle::Handle;

/// Number of hex digits that encode a handle at the end of a path.
const HANDLE_DIGITS: usize = 4;

/// Error returned when a handle cannot be derived from an object path.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("object path does not end in a 4-digit hex handle: {0:?}")]
pub struct HandleError(String);

/// Hierarchical object identifier assigned by the bus service.
#[derive(
    Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Wraps a path string.
    #[inline]
    #[must_use]
    pub fn new(p: impl Into<String>) -> Self {
        Self(p.into())
    }

    /// Returns the path as a string slice.
    #[inline(always)]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path segment.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns whether `self` is a strict descendant of `parent`. The match is
    /// on whole segments, so `.../service0001` is not a parent of
    /// `.../service00010/char0011`.
    #[must_use]
    pub fn is_child_of(&self, parent: &Self) -> bool {
        (self.0.strip_prefix(parent.as_str())).map_or(false, |rest| rest.starts_with('/'))
    }

    /// Returns a child path with the given final segment.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        Self(format!("{}/{name}", self.0))
    }

    /// Returns the attribute handle encoded in the last four characters of
    /// the final segment.
    pub fn handle(&self) -> Result<Handle, HandleError> {
        handle_of(self.as_str())
    }
}

impl Deref for ObjectPath {
    type Target = str;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for ObjectPath {
    #[inline(always)]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    #[inline]
    fn from(p: &str) -> Self {
        Self(p.to_owned())
    }
}

impl From<String> for ObjectPath {
    #[inline]
    fn from(p: String) -> Self {
        Self(p)
    }
}

impl PartialEq<str> for ObjectPath {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Parses the last four hex characters of the final segment of `path` as an
/// attribute handle. A segment that is shorter than four characters or does
/// not end in hex digits is an error.
pub fn handle_of(path: &str) -> Result<Handle, HandleError> {
    let err = || HandleError(path.to_owned());
    let seg = path.rsplit('/').next().unwrap_or_default();
    let Some(hex) = seg.get(seg.len().wrapping_sub(HANDLE_DIGITS)..) else {
        return Err(err());
    };
    if !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(err());
    }
    u16::from_str_radix(hex, 16).map(Handle::new).map_err(|_| err())
}

/// Returns the characteristic value handle for a characteristic declaration
/// handle ([Vol 3] Part G, Section 3.3). Returns `None` for `0xFFFF`, which
/// cannot be followed by a value.
#[inline]
#[must_use]
pub const fn value_handle_of(decl: Handle) -> Option<Handle> {
    decl.next()
}

/// Returns the object path of the named adapter (`hci0` ->
/// `/org/bluez/hci0`).
#[must_use]
pub fn adapter_path(name: &str) -> ObjectPath {
    ObjectPath(format!("/org/bluez/{name}"))
}

/// Returns the object path of a device under an adapter.
#[must_use]
pub fn device_path(adapter: &ObjectPath, addr: RawAddr) -> ObjectPath {
    adapter.join(&addr.dev_segment())
}
