//! Adapter handle and queries addressed by device address.
//!
//! These operations do not need a [`Connection`]. Each call takes its own
//! object snapshot and releases it before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

pub use adv::*;

use crate::access::{self, ensure_ready, WriteMode};
use crate::addr::RawAddr;
use crate::bus::{Bus, Change, DeviceInfo, Ifaces, Snapshot};
use crate::config::{Config, ConnectOptions};
use crate::conn::Connection;
use crate::discover::{self, Characteristic, Descriptor, PrimaryService, Scope};
use crate::handle::{Handle, HandleRange};
use crate::path::{adapter_path, device_path, ObjectPath};
use crate::resolve::Attribute;
use crate::{Error, Result};

mod adv;

/// Bluetooth adapter managed by the service.
#[derive(Clone, Debug)]
pub struct Adapter {
    bus: Arc<dyn Bus>,
    path: ObjectPath,
    resolve_timeout: Duration,
}

impl Adapter {
    /// Opens the named adapter, or the configured default adapter if `name`
    /// is `None`.
    pub async fn open(bus: Arc<dyn Bus>, cfg: &Config, name: Option<&str>) -> Result<Self> {
        let path = adapter_path(name.unwrap_or(&cfg.adapter));
        let objs = bus.objects().await?;
        if !(objs.iter()).any(|o| o.path == path && o.ifaces.contains(Ifaces::ADAPTER)) {
            debug!("Adapter {path} not found");
            return Err(Error::NotFound);
        }
        debug!("Opened adapter {path}");
        Ok(Self {
            bus,
            path,
            resolve_timeout: cfg.resolve_timeout,
        })
    }

    /// Returns the adapter object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Connects to a device.
    pub async fn connect(&self, addr: RawAddr, opts: &ConnectOptions) -> Result<Connection> {
        let timeout = opts.resolve_timeout.unwrap_or(self.resolve_timeout);
        let bus = Arc::clone(&self.bus);
        Connection::open(bus, self.path.clone(), addr, timeout, opts.addr_type).await
    }

    /// Returns whether the device is connected.
    pub async fn is_connected(&self, addr: RawAddr) -> Result<bool> {
        Ok(self.info(addr).await?.connected)
    }

    /// Returns whether the device services are resolved.
    pub async fn is_services_resolved(&self, addr: RawAddr) -> Result<bool> {
        Ok(self.info(addr).await?.services_resolved)
    }

    /// Returns whether the device uses a public address.
    pub async fn is_public_address(&self, addr: RawAddr) -> Result<bool> {
        Ok(self.info(addr).await?.address_type.is_public())
    }

    /// Returns the RSSI of the last advertisement.
    pub async fn rssi(&self, addr: RawAddr) -> Result<i16> {
        self.info(addr).await?.rssi.ok_or(Error::NotFound)
    }

    /// Returns the advertising flags byte.
    pub async fn advertising_flags(&self, addr: RawAddr) -> Result<u8> {
        match self.info(addr).await?.advertising_flags.as_deref() {
            Some(&[v]) => Ok(v),
            Some(v) => {
                debug!("Unexpected advertising flags length: {}", v.len());
                Err(Error::NotFound)
            }
            None => Err(Error::NotFound),
        }
    }

    /// Returns the advertising data encoded as length-type-value fields, up
    /// to `max_len` bytes.
    pub async fn raw_advertising_data(&self, addr: RawAddr, max_len: usize) -> Result<RawAdvData> {
        let info = self.info(addr).await?;
        let mut b = AdvDataMut::new(max_len);
        b.extend(&info.advertising_data);
        Ok(b.get())
    }

    /// Returns service and manufacturer data of the last advertisement.
    pub async fn advertisement_data(&self, addr: RawAddr) -> Result<AdvertisementData> {
        let info = self.info(addr).await?;
        Ok(AdvertisementData::new(&info.service_data, info.manufacturer_data))
    }

    /// Returns primary services of a connected device.
    pub async fn discover_primary(&self, addr: RawAddr) -> Result<Vec<PrimaryService>> {
        let (dev, snap) = self.ready(addr).await?;
        self.scope(&dev, &snap).primary_services().await
    }

    /// Returns characteristics of a connected device.
    pub async fn discover_char(&self, addr: RawAddr) -> Result<Vec<Characteristic>> {
        let (dev, snap) = self.ready(addr).await?;
        self.scope(&dev, &snap).characteristics(HandleRange::ALL).await
    }

    /// Returns characteristics of a connected device with declaration
    /// handles in `start..=end`.
    pub async fn discover_char_range(
        &self,
        addr: RawAddr,
        start: Handle,
        end: Handle,
    ) -> Result<Vec<Characteristic>> {
        let r = HandleRange::new(start, end).ok_or_else(|| {
            Error::InvalidParameter(format!("invalid handle range {start}..={end}"))
        })?;
        let (dev, snap) = self.ready(addr).await?;
        self.scope(&dev, &snap).characteristics(r).await
    }

    /// Returns descriptors of a connected device.
    pub async fn discover_desc(&self, addr: RawAddr) -> Result<Vec<Descriptor>> {
        let (dev, snap) = self.ready(addr).await?;
        self.scope(&dev, &snap).descriptors().await
    }

    /// Descriptor discovery by handle range. Always fails with
    /// [`Error::NotSupported`].
    pub async fn discover_desc_range(
        &self,
        _: RawAddr,
        _: Handle,
        _: Handle,
    ) -> Result<Vec<Descriptor>> {
        discover::descriptors_in_range()
    }

    /// Reads the characteristic value or descriptor with the specified handle.
    pub async fn read_by_handle(&self, addr: RawAddr, h: Handle) -> Result<Vec<u8>> {
        let attr = self.resolve_handle(addr, h).await?;
        access::read(&*self.bus, &attr).await
    }

    /// Writes the characteristic value or descriptor with the specified
    /// handle.
    pub async fn write_by_handle(
        &self,
        addr: RawAddr,
        h: Handle,
        v: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let attr = self.resolve_handle(addr, h).await?;
        access::write(&*self.bus, &attr, v, mode).await
    }

    /// Calls `f(addr, is_public, resolved)` whenever the services resolved
    /// state of the device changes, until the returned guard is dropped.
    pub async fn watch_services_resolved(
        &self,
        addr: RawAddr,
        mut f: impl FnMut(RawAddr, bool, bool) + Send + 'static,
    ) -> Result<ResolvedWatch> {
        let dev = self.device(addr);
        let public = self.info(addr).await?.address_type.is_public();
        let mut changes = self.bus.watch(&dev).await?;
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    c = changes.recv() => match c {
                        Some(Change::ServicesResolved(v)) => f(addr, public, v),
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            trace!("Resolved watch for {addr} stopped");
        });
        Ok(ResolvedWatch(cancel.drop_guard()))
    }

    fn device(&self, addr: RawAddr) -> ObjectPath {
        device_path(&self.path, addr)
    }

    /// Returns device properties.
    async fn info(&self, addr: RawAddr) -> Result<DeviceInfo> {
        match self.bus.device(&self.device(addr)).await {
            Ok(info) => Ok(info),
            Err(e) if e.is_unknown_object() => Err(Error::DeviceNotFound(addr)),
            Err(e) => Err(e.into()),
        }
    }

    /// Verifies that the device is connected and resolved and takes a
    /// snapshot of its objects. A device without an object is reported as
    /// not connected.
    async fn ready(&self, addr: RawAddr) -> Result<(ObjectPath, Arc<Snapshot>)> {
        let dev = self.device(addr);
        if let Err(e) = ensure_ready(&*self.bus, &dev).await {
            return Err(match e {
                Error::Bus(e) if e.is_unknown_object() => {
                    debug!("No device object for {addr}");
                    Error::NotConnected
                }
                e => e,
            });
        }
        let snap = Snapshot::take(&*self.bus, &self.path).await?;
        Ok((dev, snap))
    }

    async fn resolve_handle(&self, addr: RawAddr, h: Handle) -> Result<Attribute> {
        let (dev, snap) = self.ready(addr).await?;
        let attr = self.scope(&dev, &snap).resolve_handle(h).await?;
        attr.ok_or(Error::NotFound)
    }

    fn scope<'a>(&'a self, dev: &'a ObjectPath, snap: &'a Snapshot) -> Scope<'a> {
        Scope {
            bus: &*self.bus,
            dev,
            snap,
        }
    }
}

/// Services resolved watch. The watch stops when this is dropped.
#[derive(Debug)]
#[must_use]
pub struct ResolvedWatch(DropGuard);
