//! Reconstruction of the ATT handle space from the object snapshot.

use std::ops::RangeBounds;

use tracing::{trace, warn};

use crate::bus::{Bus, Ifaces, Snapshot};
use crate::handle::{Handle, HandleRange};
use crate::path::{value_handle_of, ObjectPath};
use crate::util::try_vec;
use crate::uuid::{Declaration, Uuid};
use crate::Result;

pub use props::*;

mod props;

/// Primary service record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PrimaryService {
    pub handle_start: Handle,
    /// One past the last characteristic declaration handle, or `handle_start`
    /// if the service has no characteristics.
    pub handle_end: Handle,
    pub uuid: Uuid,
}

/// Characteristic record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Characteristic {
    /// Declaration handle.
    pub handle: Handle,
    /// Value handle, always `handle + 1`.
    pub value_handle: Handle,
    pub properties: CharProps,
    pub uuid: Uuid,
}

/// Descriptor record. Service and characteristic declarations are included
/// as pseudo-descriptors so that every discovered handle is described.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Descriptor {
    pub handle: Handle,
    /// 16-bit form of `uuid`, or [`Descriptor::NO_UUID16`].
    pub uuid16: u16,
    pub uuid: Uuid,
}

impl Descriptor {
    /// `uuid16` of characteristic value entries and 128-bit descriptors.
    pub const NO_UUID16: u16 = 0xFFFF;

    fn declaration(handle: Handle, d: Declaration) -> Self {
        Self {
            handle,
            uuid16: d.into(),
            uuid: d.uuid(),
        }
    }
}

/// Attribute objects of one device.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scope<'a> {
    pub bus: &'a dyn Bus,
    pub dev: &'a ObjectPath,
    pub snap: &'a Snapshot,
}

impl<'a> Scope<'a> {
    /// Opens the device object. Unlike attribute objects, failure here
    /// aborts discovery.
    async fn open_device(self) -> Result<()> {
        self.bus.device(self.dev).await?;
        Ok(())
    }

    /// Returns all primary services sorted by start handle.
    pub async fn primary_services(self) -> Result<Vec<PrimaryService>> {
        self.open_device().await?;
        let mut v = try_vec(self.snap.under(self.dev, Ifaces::SERVICE).count())?;
        for o in self.snap.under(self.dev, Ifaces::SERVICE) {
            let info = match self.bus.service(&o.path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to open service {}: {e}", o.path);
                    continue;
                }
            };
            if info.device != *self.dev {
                continue;
            }
            if !info.primary {
                trace!("Skipping secondary service {}", o.path);
                continue;
            }
            let (Some(start), Some(uuid)) = (handle(&o.path), uuid(&o.path, &info.uuid)) else {
                continue;
            };
            let end = (self.snap.under(&o.path, Ifaces::CHARACTERISTIC))
                .filter_map(|c| c.path.handle().ok())
                .fold(start, |end, h| end.max(value_handle_of(h).unwrap_or(h)));
            let svc = PrimaryService {
                handle_start: start,
                handle_end: end,
                uuid,
            };
            v.push((svc, &o.path));
        }
        v.sort_by_key(|(s, _)| s.handle_start);
        v.dedup_by(|(s, path), (prev, _)| {
            let dup = s.handle_start == prev.handle_start;
            if dup {
                warn!("Skipping service {path} with duplicate handle {}", s.handle_start);
            }
            dup
        });
        let mut out = try_vec(v.len())?;
        out.extend(v.into_iter().map(|(s, _)| s));
        Ok(out)
    }

    /// Returns characteristics whose declaration handle is within `range`,
    /// sorted by handle.
    pub async fn characteristics(self, range: HandleRange) -> Result<Vec<Characteristic>> {
        self.open_device().await?;
        let mut v = try_vec(self.snap.under(self.dev, Ifaces::CHARACTERISTIC).count())?;
        for o in self.snap.under(self.dev, Ifaces::CHARACTERISTIC) {
            let Some(handle) = handle(&o.path) else {
                continue;
            };
            if !range.contains(&handle) {
                continue;
            }
            let Some(value_handle) = value_handle_of(handle) else {
                warn!("Characteristic {} has no room for a value handle", o.path);
                continue;
            };
            let info = match self.bus.characteristic(&o.path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to open characteristic {}: {e}", o.path);
                    continue;
                }
            };
            let Some(uuid) = uuid(&o.path, &info.uuid) else {
                continue;
            };
            v.push(Characteristic {
                handle,
                value_handle,
                properties: CharProps::from_flags(&info.flags),
                uuid,
            });
        }
        v.sort_by_key(|c| c.handle);
        Ok(v)
    }

    /// Returns service and characteristic declarations, characteristic
    /// values, and descriptors, sorted by handle.
    pub async fn descriptors(self) -> Result<Vec<Descriptor>> {
        let svcs = self.primary_services().await?;
        let chars = self.characteristics(HandleRange::ALL).await?;
        let n = self.snap.under(self.dev, Ifaces::DESCRIPTOR).count();
        let mut v = try_vec(svcs.len() + 2 * chars.len() + n)?;
        for s in &svcs {
            v.push(Descriptor::declaration(s.handle_start, Declaration::PrimaryService));
        }
        for c in &chars {
            v.push(Descriptor::declaration(c.handle, Declaration::Characteristic));
            v.push(Descriptor {
                handle: c.value_handle,
                uuid16: Descriptor::NO_UUID16,
                uuid: c.uuid,
            });
        }
        for o in self.snap.under(self.dev, Ifaces::DESCRIPTOR) {
            let Some(handle) = handle(&o.path) else {
                continue;
            };
            let info = match self.bus.descriptor(&o.path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to open descriptor {}: {e}", o.path);
                    continue;
                }
            };
            let Some(uuid) = uuid(&o.path, &info.uuid) else {
                continue;
            };
            v.push(Descriptor {
                handle,
                uuid16: uuid.as_u16().unwrap_or(Descriptor::NO_UUID16),
                uuid,
            });
        }
        v.sort_by_key(|d| d.handle);
        Ok(v)
    }
}

/// Descriptor discovery by handle range is not available through the
/// object interface.
#[inline]
pub(crate) fn descriptors_in_range() -> Result<Vec<Descriptor>> {
    Err(crate::Error::NotSupported("descriptor discovery by handle range"))
}

/// Returns the handle of an attribute object, logging malformed paths.
fn handle(path: &ObjectPath) -> Option<Handle> {
    (path.handle())
        .map_err(|e| warn!("Skipping attribute: {e}"))
        .ok()
}

/// Decodes an attribute UUID, logging malformed values.
fn uuid(path: &ObjectPath, s: &str) -> Option<Uuid> {
    Uuid::parse(s)
        .map_err(|e| warn!("Skipping {path}: {e}"))
        .ok()
}
