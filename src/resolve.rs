//! Attribute lookup by UUID or handle.

use tracing::{error, trace, warn};

use crate::bus::Ifaces;
use crate::discover::Scope;
use crate::handle::Handle;
use crate::path::{value_handle_of, ObjectPath};
use crate::uuid::{CharacteristicType, DescriptorType, Uuid};
use crate::{Error, Result};

/// Object backing an attribute and the access path used for it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Attribute {
    Characteristic(ObjectPath),
    Descriptor(ObjectPath),
    /// Battery level served by the `org.bluez.Battery1` interface of the
    /// device object.
    Battery(ObjectPath),
}

impl Attribute {
    /// Returns the backing object path.
    #[inline]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        match *self {
            Self::Characteristic(ref p) | Self::Descriptor(ref p) | Self::Battery(ref p) => p,
        }
    }
}

impl<'a> Scope<'a> {
    /// Finds the characteristic with the specified UUID. When several
    /// characteristics share a UUID, the first one in snapshot order is
    /// returned.
    pub async fn resolve_uuid(self, uuid: Uuid) -> Result<Option<Attribute>> {
        if uuid == DescriptorType::ClientCharacteristicConfiguration {
            error!("Client Characteristic Configuration is not exposed by BlueZ 5.42+");
            return Err(Error::NotSupported(
                "Client Characteristic Configuration descriptor access",
            ));
        }
        if uuid == CharacteristicType::BatteryLevel
            && (self.snap.get(self.dev)).map_or(false, |o| o.ifaces.contains(Ifaces::BATTERY))
        {
            trace!("Using battery interface of {}", self.dev);
            return Ok(Some(Attribute::Battery(self.dev.clone())));
        }
        for o in self.snap.under(self.dev, Ifaces::CHARACTERISTIC) {
            let info = match self.bus.characteristic(&o.path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to open characteristic {}: {e}", o.path);
                    continue;
                }
            };
            if Uuid::parse(&info.uuid).ok() != Some(uuid) {
                continue;
            }
            match self.bus.service(&info.service).await {
                Ok(svc) if svc.device == *self.dev => {
                    return Ok(Some(Attribute::Characteristic(o.path.clone())));
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to open service {}: {e}", info.service),
            }
        }
        Ok(None)
    }

    /// Finds the characteristic value or descriptor with the specified
    /// handle. A characteristic value takes precedence over a descriptor
    /// with the same handle.
    pub async fn resolve_handle(self, h: Handle) -> Result<Option<Attribute>> {
        let value = |o: &&crate::bus::Object| {
            (o.path.handle().ok()).and_then(value_handle_of) == Some(h)
        };
        if let Some(o) = self.snap.under(self.dev, Ifaces::CHARACTERISTIC).find(value) {
            return Ok(Some(Attribute::Characteristic(o.path.clone())));
        }
        Ok((self.snap.under(self.dev, Ifaces::DESCRIPTOR))
            .find(|o| o.path.handle().ok() == Some(h))
            .map(|o| Attribute::Descriptor(o.path.clone())))
    }
}
