//! Length-type-value encoding of advertising data ([Vol 3] Part C, Section
//! 11).

use std::collections::BTreeMap;

use structbuf::{Pack, StructBuf};
use tracing::{debug, warn};

use crate::uuid::Uuid;
use crate::Status;

/// Advertising data re-encoded from the per-type map reported by the
/// service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawAdvData {
    data: Vec<u8>,
    truncated: bool,
}

impl RawAdvData {
    /// Returns the encoded data.
    #[inline(always)]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns whether any fields were skipped because they did not fit.
    #[inline(always)]
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns [`Status::OutOfMemory`] if the data was truncated.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> Status {
        if self.truncated {
            Status::OutOfMemory
        } else {
            Status::Success
        }
    }
}

impl AsRef<[u8]> for RawAdvData {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Advertising data builder with a fixed maximum length.
#[derive(Clone, Debug)]
pub(crate) struct AdvDataMut {
    buf: StructBuf,
    max: usize,
    truncated: bool,
}

impl AdvDataMut {
    /// Creates an empty buffer that can hold up to `max` bytes.
    #[inline]
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            buf: StructBuf::new(max),
            max,
            truncated: false,
        }
    }

    /// Appends one `[len, type, data...]` field. Fields that do not fit are
    /// skipped and the result is marked as truncated.
    pub fn put(&mut self, typ: u8, v: &[u8]) -> &mut Self {
        let n = v.len() + 1;
        match u8::try_from(n) {
            Ok(len) if self.buf.len() + 1 + n <= self.max => {
                self.buf.append().put([len, typ]).put(v);
            }
            _ => {
                debug!("Skipping AD type {typ:#04X} ({} bytes)", v.len());
                self.truncated = true;
            }
        }
        self
    }

    /// Encodes all fields of `m` in type order.
    pub fn extend<'a>(&mut self, m: impl IntoIterator<Item = (&'a u8, &'a Vec<u8>)>) -> &mut Self {
        for (&typ, v) in m {
            self.put(typ, v);
        }
        self
    }

    /// Returns the final advertising data.
    #[must_use]
    pub fn get(self) -> RawAdvData {
        RawAdvData {
            data: self.buf.as_ref().to_vec(),
            truncated: self.truncated,
        }
    }
}

/// Service and manufacturer data from the last advertisement.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvertisementData {
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

impl AdvertisementData {
    /// Decodes service data keys. Malformed UUIDs are logged and skipped.
    pub(crate) fn new(
        service_data: &BTreeMap<String, Vec<u8>>,
        manufacturer_data: BTreeMap<u16, Vec<u8>>,
    ) -> Self {
        let service_data = (service_data.iter())
            .filter_map(|(k, v)| match Uuid::parse(k) {
                Ok(u) => Some((u, v.clone())),
                Err(e) => {
                    warn!("Skipping service data: {e}");
                    None
                }
            })
            .collect();
        Self {
            service_data,
            manufacturer_data,
        }
    }
}
