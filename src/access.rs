//! Attribute reads and writes.

use tracing::{debug, trace};

use crate::bus::{AttrIface, Bus, DeviceInfo, OptValue, Options};
use crate::conn::Connection;
use crate::handle::Handle;
use crate::path::ObjectPath;
use crate::resolve::Attribute;
use crate::uuid::Uuid;
use crate::{Error, Result};

/// Characteristic write procedure ([Vol 3] Part G, Section 4.9).
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
pub enum WriteMode {
    /// Write Characteristic Value. Completes when the peer acknowledges the
    /// write.
    #[default]
    #[strum(serialize = "request")]
    WithResponse,
    /// Write Without Response. Completes once the value is handed to the
    /// service. The characteristic's properties are not checked.
    #[strum(serialize = "command")]
    WithoutResponse,
    /// Reliable Writes.
    #[strum(serialize = "reliable")]
    Reliable,
}

impl WriteMode {
    /// Returns `WriteValue` options selecting this mode.
    #[must_use]
    pub fn options(self) -> Options {
        Options::from([("type".to_owned(), OptValue::Str(self.to_string()))])
    }
}

/// Returns device properties if the device is connected and its services are
/// resolved.
pub(crate) async fn ensure_ready(bus: &dyn Bus, dev: &ObjectPath) -> Result<DeviceInfo> {
    let info = bus.device(dev).await?;
    if !info.connected {
        return Err(Error::NotConnected);
    }
    if !info.services_resolved {
        return Err(Error::Busy);
    }
    Ok(info)
}

/// Reads an attribute value.
pub(crate) async fn read(bus: &dyn Bus, attr: &Attribute) -> Result<Vec<u8>> {
    let v = match *attr {
        Attribute::Characteristic(ref p) => {
            (bus.read_value(p, AttrIface::Characteristic, Options::new())).await?
        }
        Attribute::Descriptor(ref p) => {
            (bus.read_value(p, AttrIface::Descriptor, Options::new())).await?
        }
        Attribute::Battery(ref p) => vec![bus.battery(p).await?],
    };
    trace!("Read {} bytes from {}", v.len(), attr.path());
    Ok(v)
}

/// Writes an attribute value.
pub(crate) async fn write(
    bus: &dyn Bus,
    attr: &Attribute,
    v: &[u8],
    mode: WriteMode,
) -> Result<()> {
    let iface = match *attr {
        Attribute::Characteristic(_) => AttrIface::Characteristic,
        Attribute::Descriptor(_) => AttrIface::Descriptor,
        Attribute::Battery(_) => return Err(Error::NotSupported("battery level is read-only")),
    };
    trace!("Writing {} bytes to {} ({mode})", v.len(), attr.path());
    (bus.write_value(attr.path(), iface, v.to_vec(), mode.options())).await?;
    Ok(())
}

impl Connection {
    /// Reads the value of the characteristic with the specified UUID.
    pub async fn read_by_uuid(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let attr = self.resolve_uuid(uuid).await?;
        read(self.bus(), &attr).await
    }

    /// Reads the characteristic value or descriptor with the specified
    /// handle.
    pub async fn read_by_handle(&self, h: Handle) -> Result<Vec<u8>> {
        let attr = self.resolve_handle(h).await?;
        read(self.bus(), &attr).await
    }

    /// Writes the value of the characteristic with the specified UUID.
    pub async fn write_by_uuid(&self, uuid: Uuid, v: &[u8], mode: WriteMode) -> Result<()> {
        let attr = self.resolve_uuid(uuid).await?;
        write(self.bus(), &attr, v, mode).await
    }

    /// Writes the characteristic value or descriptor with the specified
    /// handle.
    pub async fn write_by_handle(&self, h: Handle, v: &[u8], mode: WriteMode) -> Result<()> {
        let attr = self.resolve_handle(h).await?;
        write(self.bus(), &attr, v, mode).await
    }

    async fn resolve_uuid(&self, uuid: Uuid) -> Result<Attribute> {
        ensure_ready(self.bus(), self.device()).await?;
        let snap = self.snapshot()?;
        let attr = self.scope(&snap).resolve_uuid(uuid).await?;
        attr.ok_or_else(|| {
            debug!("No attribute with UUID {uuid}");
            Error::NotFound
        })
    }

    async fn resolve_handle(&self, h: Handle) -> Result<Attribute> {
        ensure_ready(self.bus(), self.device()).await?;
        let snap = self.snapshot()?;
        let attr = self.scope(&snap).resolve_handle(h).await?;
        attr.ok_or_else(|| {
            debug!("No attribute with handle {h}");
            Error::NotFound
        })
    }
}

#[cfg(test)]
mod tests;
