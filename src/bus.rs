//! Bluetooth management service interface.
//!
//! The GATT client never talks to a controller directly. Everything it knows
//! about a peripheral comes from a service (BlueZ) that exposes adapters,
//! devices, and discovered attributes as bus objects with typed properties.
//! [`Bus`] is the subset of that object model used by this crate.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use bitflags::bitflags;
pub use futures_core::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::trace;

use crate::addr::{AddrType, RawAddr};
use crate::path::ObjectPath;

#[cfg(feature = "bluez")]
pub mod bluez;
#[cfg(test)]
pub(crate) mod mock;

/// Error name returned by the bus for a missing object.
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Error returned by a bus call.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection to the bus failed or a message could not be delivered.
    #[error("bus transport error: {0}")]
    Transport(String),
    /// Object does not exist. Carries the service's message.
    #[error("unknown object: {0}")]
    UnknownObject(String),
    /// Error reply from the service.
    #[error("{name}: {msg}")]
    Domain { name: String, msg: String },
}

impl Error {
    /// Creates an error from an error reply name and message. The standard
    /// unknown object reply is mapped to [`Error::UnknownObject`].
    #[must_use]
    pub fn domain(name: impl Into<String>, msg: impl Into<String>) -> Self {
        let (name, msg) = (name.into(), msg.into());
        if name == UNKNOWN_OBJECT {
            return Self::UnknownObject(msg);
        }
        Self::Domain { name, msg }
    }

    /// Returns whether the error was caused by the transport rather than the
    /// service.
    #[inline]
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(*self, Self::Transport(_))
    }

    /// Returns whether the error indicates a missing object.
    #[inline]
    #[must_use]
    pub const fn is_unknown_object(&self) -> bool {
        matches!(*self, Self::UnknownObject(_))
    }
}

/// Common bus result type.
pub type Result<T> = std::result::Result<T, Error>;

bitflags! {
    /// Interfaces implemented by an object.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[repr(transparent)]
    pub struct Ifaces: u8 {
        /// `org.bluez.Adapter1`
        const ADAPTER = 1 << 0;
        /// `org.bluez.Device1`
        const DEVICE = 1 << 1;
        /// `org.bluez.GattService1`
        const SERVICE = 1 << 2;
        /// `org.bluez.GattCharacteristic1`
        const CHARACTERISTIC = 1 << 3;
        /// `org.bluez.GattDescriptor1`
        const DESCRIPTOR = 1 << 4;
        /// `org.bluez.Battery1`
        const BATTERY = 1 << 5;
    }
}

/// Object reported by the service's object manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Object {
    pub path: ObjectPath,
    pub ifaces: Ifaces,
}

impl Object {
    /// Creates an object record.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<ObjectPath>, ifaces: Ifaces) -> Self {
        Self {
            path: path.into(),
            ifaces,
        }
    }
}

/// Point-in-time copy of the object list under one adapter. Discovery never
/// mutates it, and lookups are linear scans. GATT databases are small enough
/// that an index is not needed.
#[derive(Clone, Debug, Default)]
pub struct Snapshot(Vec<Object>);

impl Snapshot {
    /// Takes a new snapshot of all objects under `root`.
    pub async fn take(bus: &dyn Bus, root: &ObjectPath) -> Result<Arc<Self>> {
        let all = bus.objects().await?;
        let v: Vec<Object> = (all.into_iter())
            .filter(|o| o.path.is_child_of(root))
            .collect();
        trace!("Snapshot of {root}: {} objects", v.len());
        Ok(Arc::new(Self(v)))
    }

    /// Returns an iterator over objects that implement all `ifaces` and
    /// are descendants of `parent`, in service order.
    pub fn under<'a>(
        &'a self,
        parent: &'a ObjectPath,
        ifaces: Ifaces,
    ) -> impl Iterator<Item = &'a Object> + 'a {
        (self.0.iter()).filter(move |o| o.ifaces.contains(ifaces) && o.path.is_child_of(parent))
    }

    /// Returns the object at `path`, if present.
    #[must_use]
    pub fn get(&self, path: &ObjectPath) -> Option<&Object> {
        self.0.iter().find(|o| o.path == *path)
    }

    /// Returns the number of objects.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the snapshot is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Object> for Snapshot {
    fn from_iter<T: IntoIterator<Item = Object>>(it: T) -> Self {
        Self(it.into_iter().collect())
    }
}

/// `org.bluez.Device1` properties.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    pub address: RawAddr,
    pub address_type: AddrType,
    pub connected: bool,
    pub services_resolved: bool,
    pub uuids: Vec<String>,
    pub rssi: Option<i16>,
    /// Advertising flags as reported by the service.
    pub advertising_flags: Option<Vec<u8>>,
    /// Raw advertising data keyed by AD type.
    pub advertising_data: BTreeMap<u8, Vec<u8>>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID string.
    pub service_data: BTreeMap<String, Vec<u8>>,
}

/// `org.bluez.GattService1` properties.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServiceInfo {
    pub device: ObjectPath,
    pub uuid: String,
    pub primary: bool,
}

/// `org.bluez.GattCharacteristic1` properties.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CharInfo {
    pub service: ObjectPath,
    pub uuid: String,
    pub flags: Vec<String>,
}

/// `org.bluez.GattDescriptor1` properties.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DescInfo {
    pub characteristic: ObjectPath,
    pub uuid: String,
}

/// Interface that owns `ReadValue`/`WriteValue` for an attribute object.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum AttrIface {
    #[strum(serialize = "org.bluez.GattCharacteristic1")]
    Characteristic,
    #[strum(serialize = "org.bluez.GattDescriptor1")]
    Descriptor,
}

/// Value of a method call option.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OptValue {
    Str(String),
    U16(u16),
}

/// Method call options (`a{sv}`).
pub type Options = BTreeMap<String, OptValue>;

/// Property change reported for a watched object.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Change {
    Connected(bool),
    ServicesResolved(bool),
    /// New characteristic value from a notification or indication.
    Value(Vec<u8>),
    /// Any other property, by name.
    Other(String),
}

/// Stream of property changes for one object. The stream ends when the
/// watch is cancelled by the bus or the receiver is dropped.
pub type Changes = mpsc::UnboundedReceiver<Change>;

/// Bluetooth management service reachable over a bus.
///
/// All methods are non-blocking. A missing object is reported as
/// [`Error::UnknownObject`].
pub trait Bus: Debug + Send + Sync + 'static {
    /// Returns all objects managed by the service. The order is unspecified.
    fn objects(&self) -> BoxFuture<'_, Result<Vec<Object>>>;

    /// Returns device properties.
    fn device<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<DeviceInfo>>;

    /// Returns service properties.
    fn service<'a>(&'a self, svc: &'a ObjectPath) -> BoxFuture<'a, Result<ServiceInfo>>;

    /// Returns characteristic properties.
    fn characteristic<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<CharInfo>>;

    /// Returns descriptor properties.
    fn descriptor<'a>(&'a self, desc: &'a ObjectPath) -> BoxFuture<'a, Result<DescInfo>>;

    /// Returns the `Percentage` property of the device battery interface.
    fn battery<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<u8>>;

    /// Calls `Device1.Connect()`.
    fn connect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;

    /// Calls `Device1.Disconnect()`.
    fn disconnect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;

    /// Calls `ReadValue(options)` on a characteristic or descriptor.
    fn read_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        opts: Options,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Calls `WriteValue(value, options)` on a characteristic or descriptor.
    fn write_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        value: Vec<u8>,
        opts: Options,
    ) -> BoxFuture<'a, Result<()>>;

    /// Calls `GattCharacteristic1.StartNotify()`.
    fn start_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;

    /// Calls `GattCharacteristic1.StopNotify()`.
    fn stop_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;

    /// Subscribes to property changes of one object.
    fn watch<'a>(&'a self, path: &'a ObjectPath) -> BoxFuture<'a, Result<Changes>>;

    /// Exports the pairing agent at `agent` and calls
    /// `AgentManager1.RegisterAgent(agent, capability)`.
    fn register_agent<'a>(
        &'a self,
        agent: &'a ObjectPath,
        capability: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Calls `AgentManager1.RequestDefaultAgent(agent)`.
    fn request_default_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;

    /// Calls `AgentManager1.UnregisterAgent(agent)`.
    fn unregister_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>>;
}
