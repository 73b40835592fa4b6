//! Connection lifecycle.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::adapter::AdvertisementData;
use crate::addr::{AddrType, RawAddr};
use crate::bus::{self, Bus, Change, Changes, Snapshot};
use crate::discover::{self, Characteristic, Descriptor, PrimaryService, Scope};
use crate::handle::{Handle, HandleRange};
use crate::notify::Subscriptions;
use crate::path::{device_path, ObjectPath};
use crate::{Error, Result};

/// Declaration handles searched by [`Connection::discover_char`].
const DISCOVER_CHAR_RANGE: (u16, u16) = (0x0000, 0x00FF);

/// Connection state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum State {
    #[default]
    Idle,
    Connecting,
    WaitingForResolution,
    Ready,
    Failed,
}

/// Handler invoked when the link drops while the connection is ready.
pub type DisconnectHandler = Box<dyn FnMut() + Send>;

/// Connection to a remote peripheral.
///
/// The connection owns the object snapshot taken once services were
/// resolved (or the resolve wait timed out). The snapshot is not refreshed.
/// The application must call [`Connection::disconnect`] to release the link,
/// even after the disconnection handler runs.
pub struct Connection {
    bus: Arc<dyn Bus>,
    addr: RawAddr,
    adapter: ObjectPath,
    dev: ObjectPath,
    state: Mutex<State>,
    snap: Mutex<Option<Arc<Snapshot>>>,
    on_disconnect: Arc<Mutex<Option<DisconnectHandler>>>,
    pub(crate) subs: Subscriptions,
    cancel: CancellationToken,
}

impl Connection {
    /// Connects to device `addr` under `adapter` and waits up to `timeout`
    /// for its services to be resolved. A timeout is not an error: the
    /// connection becomes ready with whatever objects exist at that point.
    pub(crate) async fn open(
        bus: Arc<dyn Bus>,
        adapter: ObjectPath,
        addr: RawAddr,
        timeout: Duration,
        addr_type: Option<AddrType>,
    ) -> Result<Self> {
        let this = Self {
            dev: device_path(&adapter, addr),
            bus,
            addr,
            adapter,
            state: Mutex::default(),
            snap: Mutex::default(),
            on_disconnect: Arc::default(),
            subs: Subscriptions::default(),
            cancel: CancellationToken::new(),
        };
        match this.establish(timeout, addr_type).await {
            Ok(()) => Ok(this),
            Err(e) => {
                warn!("Failed to connect to {addr}: {e}");
                this.set_state(State::Failed);
                Err(e)
            }
        }
    }

    async fn establish(&self, timeout: Duration, addr_type: Option<AddrType>) -> Result<()> {
        self.set_state(State::Connecting);
        let info = (self.bus.device(&self.dev).await).map_err(|e| self.not_found(e))?;
        if let Some(t) = addr_type.filter(|&t| t != info.address_type) {
            return Err(Error::InvalidParameter(format!(
                "{} has {} address, expected {t}",
                self.addr, info.address_type
            )));
        }
        // Subscribe before Connect() so that the resolution change is not
        // missed.
        let mut changes = self.bus.watch(&self.dev).await?;
        (self.bus.connect(&self.dev).await).map_err(|e| self.not_found(e))?;

        self.set_state(State::WaitingForResolution);
        if self.bus.device(&self.dev).await?.services_resolved {
            trace!("Services of {} already resolved", self.addr);
        } else {
            let resolved = async {
                while let Some(c) = changes.recv().await {
                    if c == Change::ServicesResolved(true) {
                        break;
                    }
                }
            };
            if tokio::time::timeout(timeout, resolved).await.is_err() {
                warn!(
                    "Services of {} not resolved after {timeout:?}, continuing",
                    self.addr
                );
            }
        }

        let snap = Snapshot::take(&*self.bus, &self.adapter).await?;
        debug!("Connected to {} ({} objects)", self.addr, snap.len());
        *self.snap.lock() = Some(snap);
        self.set_state(State::Ready);
        self.watch_link(changes);
        Ok(())
    }

    /// Calls the disconnection handler whenever the link drops.
    fn watch_link(&self, mut changes: Changes) {
        let (cancel, handler, addr) = (self.cancel.clone(), Arc::clone(&self.on_disconnect), self.addr);
        tokio::spawn(async move {
            loop {
                let c = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    c = changes.recv() => c,
                };
                match c {
                    Some(Change::Connected(false)) => {
                        info!("{addr} disconnected");
                        if let Some(f) = handler.lock().as_mut() {
                            f();
                        }
                    }
                    Some(c) => trace!("{addr}: {c:?}"),
                    None => break,
                }
            }
            trace!("Link watch for {addr} stopped");
        });
    }

    /// Disconnects from the device and releases the object snapshot.
    /// Disconnect failures are logged and otherwise ignored.
    pub async fn disconnect(&self) {
        if matches!(self.state(), State::Idle | State::Failed) {
            return;
        }
        self.stop_all_notify().await;
        self.cancel.cancel();
        if let Err(e) = self.bus.disconnect(&self.dev).await {
            warn!("Failed to disconnect from {}: {e}", self.addr);
        }
        self.snap.lock().take();
        self.set_state(State::Idle);
    }

    /// Sets the handler that is called when the link drops.
    pub fn on_disconnect(&self, f: impl FnMut() + Send + 'static) {
        *self.on_disconnect.lock() = Some(Box::new(f));
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Returns the peer address.
    #[inline(always)]
    #[must_use]
    pub const fn addr(&self) -> RawAddr {
        self.addr
    }

    /// Returns the device object path.
    #[inline(always)]
    #[must_use]
    pub const fn device(&self) -> &ObjectPath {
        &self.dev
    }

    /// Returns the RSSI of the last advertisement.
    pub async fn rssi(&self) -> Result<i16> {
        let info = (self.bus.device(&self.dev).await).map_err(|e| self.not_found(e))?;
        info.rssi.ok_or(Error::NotFound)
    }

    /// Returns service and manufacturer data of the last advertisement.
    pub async fn advertisement_data(&self) -> Result<AdvertisementData> {
        let info = (self.bus.device(&self.dev).await).map_err(|e| self.not_found(e))?;
        Ok(AdvertisementData::new(&info.service_data, info.manufacturer_data))
    }

    /// Returns all primary services sorted by start handle.
    pub async fn discover_primary(&self) -> Result<Vec<PrimaryService>> {
        let snap = self.snapshot()?;
        self.scope(&snap).primary_services().await
    }

    /// Returns characteristics with declaration handles in
    /// `0x0000..=0x00FF`, sorted by handle. Use
    /// [`Connection::discover_char_range`] for higher handles.
    pub async fn discover_char(&self) -> Result<Vec<Characteristic>> {
        let (start, end) = DISCOVER_CHAR_RANGE;
        self.discover_char_range(Handle::new(start), Handle::new(end)).await
    }

    /// Returns characteristics with declaration handles in `start..=end`.
    pub async fn discover_char_range(
        &self,
        start: Handle,
        end: Handle,
    ) -> Result<Vec<Characteristic>> {
        let r = HandleRange::new(start, end).ok_or_else(|| {
            Error::InvalidParameter(format!("invalid handle range {start}..={end}"))
        })?;
        let snap = self.snapshot()?;
        self.scope(&snap).characteristics(r).await
    }

    /// Returns all descriptors, including service and characteristic
    /// declarations and characteristic values, sorted by handle.
    pub async fn discover_desc(&self) -> Result<Vec<Descriptor>> {
        let snap = self.snapshot()?;
        self.scope(&snap).descriptors().await
    }

    /// Descriptor discovery by handle range. Always fails with
    /// [`Error::NotSupported`].
    pub async fn discover_desc_range(&self, _: Handle, _: Handle) -> Result<Vec<Descriptor>> {
        discover::descriptors_in_range()
    }

    pub(crate) fn bus(&self) -> &dyn Bus {
        &*self.bus
    }

    /// Returns the connection snapshot or [`Error::NotConnected`] after
    /// disconnect.
    pub(crate) fn snapshot(&self) -> Result<Arc<Snapshot>> {
        (self.snap.lock().clone()).ok_or(Error::NotConnected)
    }

    pub(crate) fn scope<'a>(&'a self, snap: &'a Snapshot) -> Scope<'a> {
        Scope {
            bus: &*self.bus,
            dev: &self.dev,
            snap,
        }
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    fn set_state(&self, s: State) {
        let mut cur = self.state.lock();
        if *cur != s {
            trace!("{}: {} -> {s}", self.addr, *cur);
            *cur = s;
        }
    }

    fn not_found(&self, e: bus::Error) -> Error {
        if e.is_unknown_object() {
            Error::DeviceNotFound(self.addr)
        } else {
            Error::Bus(e)
        }
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("dev", &self.dev)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
