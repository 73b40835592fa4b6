//! Blocking and callback-completed API.
//!
//! All async operations run on one [`Worker`] thread driving a
//! current-thread runtime. Blocking methods submit a future to the worker and
//! wait for its result. `*_async` methods return immediately and invoke the
//! callback exactly once, on the worker thread, with the operation status.
//! Blocking methods called from the worker thread (for example, from a
//! callback) or from any other async context fail with [`Error::Internal`].

use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::access::WriteMode;
use crate::addr::RawAddr;
use crate::adapter::{AdvertisementData, RawAdvData, ResolvedWatch};
use crate::bus::Bus;
use crate::config::{Config, ConnectOptions};
use crate::conn::State;
use crate::discover::{Characteristic, Descriptor, PrimaryService};
use crate::handle::Handle;
use crate::uuid::Uuid;
use crate::{Error, Result, Status};

/// Thread that services all backend completions.
#[derive(Debug)]
pub struct Worker {
    rt: tokio::runtime::Handle,
    stop: Option<oneshot::Sender<()>>,
    thr: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Starts the worker thread.
    pub fn new() -> Result<Self> {
        let rt = (tokio::runtime::Builder::new_current_thread().enable_all().build())
            .map_err(|e| {
                error!("Failed to create worker runtime: {e}");
                Error::Internal("failed to create worker runtime")
            })?;
        let handle = rt.handle().clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let thr = (thread::Builder::new().name("gattbus-worker".to_owned()))
            .spawn(move || {
                debug!("Worker thread started");
                let _ = rt.block_on(stopped);
                debug!("Worker thread terminating");
            })
            .map_err(|e| {
                error!("Failed to start worker thread: {e}");
                Error::Internal("failed to start worker thread")
            })?;
        Ok(Self {
            rt: handle,
            stop: Some(stop),
            thr: Some(thr),
        })
    }

    /// Runs `f` on the worker and blocks until it completes.
    pub fn block_on<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            error!("Blocking call from an async context");
            return Err(Error::Internal("blocking call from an async context"));
        }
        let (tx, rx) = oneshot::channel();
        self.rt.spawn(async move {
            let _ = tx.send(f.await);
        });
        (rx.blocking_recv()).map_err(|_| Error::Internal("worker stopped"))?
    }

    /// Runs `f` on the worker and passes its result to `done` on the worker
    /// thread.
    pub fn spawn<T, F>(&self, f: F, done: impl FnOnce(Result<T>) + Send + 'static)
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.rt.spawn(async move { done(f.await) });
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(h) = self.thr.take() {
            // The last reference may be released by a callback
            if h.thread().id() != thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

/// Passes the status and, on success, the value to `f`.
fn complete<T, F>(f: F) -> impl FnOnce(Result<T>) + Send + 'static
where
    T: Default,
    F: FnOnce(Status, T) + Send + 'static,
{
    move |r| match r {
        Ok(v) => f(Status::Success, v),
        Err(e) => {
            debug!("Async operation failed: {e}");
            f(e.status(), T::default())
        }
    }
}

/// Entry point of the blocking API.
#[derive(Clone, Debug)]
pub struct Session {
    worker: Arc<Worker>,
    bus: Arc<dyn Bus>,
    cfg: Config,
}

impl Session {
    /// Creates a session using the specified bus.
    pub fn new(bus: Arc<dyn Bus>, cfg: Config) -> Result<Self> {
        Ok(Self {
            worker: Arc::new(Worker::new()?),
            bus,
            cfg,
        })
    }

    /// Creates a session connected to BlueZ on the system bus.
    #[cfg(feature = "bluez")]
    pub fn system(cfg: Config) -> Result<Self> {
        let worker = Worker::new()?;
        let bus = worker.block_on(async {
            let b = crate::bus::bluez::BlueZ::system().await?;
            Ok::<_, Error>(Arc::new(b) as Arc<dyn Bus>)
        })?;
        Ok(Self {
            worker: Arc::new(worker),
            bus,
            cfg,
        })
    }

    /// Returns the session configuration.
    #[inline(always)]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.cfg
    }

    /// Opens the named adapter, or the configured default adapter.
    pub fn open_adapter(&self, name: Option<&str>) -> Result<Adapter> {
        let (bus, cfg, name) = (Arc::clone(&self.bus), self.cfg.clone(), name.map(str::to_owned));
        let inner = (self.worker).block_on(async move {
            crate::Adapter::open(bus, &cfg, name.as_deref()).await
        })?;
        Ok(Adapter {
            worker: Arc::clone(&self.worker),
            inner: Arc::new(inner),
        })
    }

    /// Returns the pairing agent for this session.
    #[must_use]
    pub fn agent(&self) -> Agent {
        Agent {
            worker: Arc::clone(&self.worker),
            inner: Arc::new(crate::Agent::new(Arc::clone(&self.bus), &self.cfg)),
        }
    }
}

/// Blocking [`crate::Agent`].
#[derive(Clone, Debug)]
pub struct Agent {
    worker: Arc<Worker>,
    inner: Arc<crate::Agent>,
}

impl Agent {
    /// Registers the agent.
    pub fn register(&self) -> Result<()> {
        let a = Arc::clone(&self.inner);
        self.worker.block_on(async move { a.register().await })
    }

    /// Unregisters the agent.
    pub fn unregister(&self) -> Result<()> {
        let a = Arc::clone(&self.inner);
        self.worker.block_on(async move { a.unregister().await })
    }

    /// Returns whether the agent is registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.is_registered()
    }
}

/// Blocking [`crate::Adapter`].
#[derive(Clone, Debug)]
pub struct Adapter {
    worker: Arc<Worker>,
    inner: Arc<crate::Adapter>,
}

impl Adapter {
    fn run<T, F>(&self, f: impl FnOnce(Arc<crate::Adapter>) -> F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.worker.block_on(f(Arc::clone(&self.inner)))
    }

    fn wrap(&self, c: crate::Connection) -> Connection {
        Connection {
            worker: Arc::clone(&self.worker),
            inner: Arc::new(c),
        }
    }

    /// Connects to a device.
    pub fn connect(&self, addr: RawAddr, opts: ConnectOptions) -> Result<Connection> {
        let c = self.run(|a| async move { a.connect(addr, &opts).await })?;
        Ok(self.wrap(c))
    }

    /// Connects to a device on the worker and passes the result to `f`.
    pub fn connect_async(
        &self,
        addr: RawAddr,
        opts: ConnectOptions,
        f: impl FnOnce(Result<Connection>) + Send + 'static,
    ) {
        let (a, this) = (Arc::clone(&self.inner), self.clone());
        (self.worker).spawn(async move { a.connect(addr, &opts).await }, move |r| {
            f(r.map(|c| this.wrap(c)));
        });
    }

    pub fn is_connected(&self, addr: RawAddr) -> Result<bool> {
        self.run(|a| async move { a.is_connected(addr).await })
    }

    pub fn is_services_resolved(&self, addr: RawAddr) -> Result<bool> {
        self.run(|a| async move { a.is_services_resolved(addr).await })
    }

    pub fn is_public_address(&self, addr: RawAddr) -> Result<bool> {
        self.run(|a| async move { a.is_public_address(addr).await })
    }

    pub fn rssi(&self, addr: RawAddr) -> Result<i16> {
        self.run(|a| async move { a.rssi(addr).await })
    }

    pub fn advertising_flags(&self, addr: RawAddr) -> Result<u8> {
        self.run(|a| async move { a.advertising_flags(addr).await })
    }

    pub fn raw_advertising_data(&self, addr: RawAddr, max_len: usize) -> Result<RawAdvData> {
        self.run(|a| async move { a.raw_advertising_data(addr, max_len).await })
    }

    pub fn advertisement_data(&self, addr: RawAddr) -> Result<AdvertisementData> {
        self.run(|a| async move { a.advertisement_data(addr).await })
    }

    pub fn discover_primary(&self, addr: RawAddr) -> Result<Vec<PrimaryService>> {
        self.run(|a| async move { a.discover_primary(addr).await })
    }

    pub fn discover_char(&self, addr: RawAddr) -> Result<Vec<Characteristic>> {
        self.run(|a| async move { a.discover_char(addr).await })
    }

    pub fn discover_char_range(
        &self,
        addr: RawAddr,
        start: Handle,
        end: Handle,
    ) -> Result<Vec<Characteristic>> {
        self.run(|a| async move { a.discover_char_range(addr, start, end).await })
    }

    pub fn discover_desc(&self, addr: RawAddr) -> Result<Vec<Descriptor>> {
        self.run(|a| async move { a.discover_desc(addr).await })
    }

    pub fn discover_desc_range(
        &self,
        addr: RawAddr,
        start: Handle,
        end: Handle,
    ) -> Result<Vec<Descriptor>> {
        self.run(|a| async move { a.discover_desc_range(addr, start, end).await })
    }

    pub fn read_by_handle(&self, addr: RawAddr, h: Handle) -> Result<Vec<u8>> {
        self.run(|a| async move { a.read_by_handle(addr, h).await })
    }

    /// Reads the attribute with handle `h` and passes the status and value
    /// to `f`. The value is empty on failure.
    pub fn read_by_handle_async(
        &self,
        addr: RawAddr,
        h: Handle,
        f: impl FnOnce(Status, Vec<u8>) + Send + 'static,
    ) {
        let a = Arc::clone(&self.inner);
        (self.worker).spawn(async move { a.read_by_handle(addr, h).await }, complete(f));
    }

    pub fn write_by_handle(
        &self,
        addr: RawAddr,
        h: Handle,
        v: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let v = v.to_vec();
        self.run(|a| async move { a.write_by_handle(addr, h, &v, mode).await })
    }

    /// Writes the attribute with handle `h` and passes the status to `f`.
    pub fn write_by_handle_async(
        &self,
        addr: RawAddr,
        h: Handle,
        v: &[u8],
        mode: WriteMode,
        f: impl FnOnce(Status) + Send + 'static,
    ) {
        let (a, v) = (Arc::clone(&self.inner), v.to_vec());
        let fut = async move { a.write_by_handle(addr, h, &v, mode).await };
        self.worker.spawn(fut, complete(move |st, ()| f(st)));
    }

    /// Calls `f(addr, is_public, resolved)` on the worker thread whenever
    /// the services resolved state of the device changes.
    pub fn watch_services_resolved(
        &self,
        addr: RawAddr,
        f: impl FnMut(RawAddr, bool, bool) + Send + 'static,
    ) -> Result<ResolvedWatch> {
        self.run(|a| async move { a.watch_services_resolved(addr, f).await })
    }
}

/// Blocking [`crate::Connection`].
#[derive(Clone, Debug)]
pub struct Connection {
    worker: Arc<Worker>,
    inner: Arc<crate::Connection>,
}

impl Connection {
    fn run<T, F>(&self, f: impl FnOnce(Arc<crate::Connection>) -> F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.worker.block_on(f(Arc::clone(&self.inner)))
    }

    /// Disconnects from the device.
    pub fn disconnect(&self) -> Result<()> {
        self.run(|c| async move {
            c.disconnect().await;
            Ok(())
        })
    }

    /// Sets the handler that is called on the worker thread when the link
    /// drops.
    pub fn on_disconnect(&self, f: impl FnMut() + Send + 'static) {
        self.inner.on_disconnect(f);
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.state()
    }

    #[inline]
    #[must_use]
    pub fn addr(&self) -> RawAddr {
        self.inner.addr()
    }

    pub fn rssi(&self) -> Result<i16> {
        self.run(|c| async move { c.rssi().await })
    }

    pub fn advertisement_data(&self) -> Result<AdvertisementData> {
        self.run(|c| async move { c.advertisement_data().await })
    }

    pub fn discover_primary(&self) -> Result<Vec<PrimaryService>> {
        self.run(|c| async move { c.discover_primary().await })
    }

    pub fn discover_char(&self) -> Result<Vec<Characteristic>> {
        self.run(|c| async move { c.discover_char().await })
    }

    pub fn discover_char_range(&self, start: Handle, end: Handle) -> Result<Vec<Characteristic>> {
        self.run(|c| async move { c.discover_char_range(start, end).await })
    }

    pub fn discover_desc(&self) -> Result<Vec<Descriptor>> {
        self.run(|c| async move { c.discover_desc().await })
    }

    pub fn discover_desc_range(&self, start: Handle, end: Handle) -> Result<Vec<Descriptor>> {
        self.run(|c| async move { c.discover_desc_range(start, end).await })
    }

    pub fn read_by_uuid(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.run(|c| async move { c.read_by_uuid(uuid).await })
    }

    pub fn read_by_handle(&self, h: Handle) -> Result<Vec<u8>> {
        self.run(|c| async move { c.read_by_handle(h).await })
    }

    pub fn read_by_uuid_async(&self, uuid: Uuid, f: impl FnOnce(Status, Vec<u8>) + Send + 'static) {
        let c = Arc::clone(&self.inner);
        (self.worker).spawn(async move { c.read_by_uuid(uuid).await }, complete(f));
    }

    pub fn read_by_handle_async(&self, h: Handle, f: impl FnOnce(Status, Vec<u8>) + Send + 'static) {
        let c = Arc::clone(&self.inner);
        (self.worker).spawn(async move { c.read_by_handle(h).await }, complete(f));
    }

    pub fn write_by_uuid(&self, uuid: Uuid, v: &[u8], mode: WriteMode) -> Result<()> {
        let v = v.to_vec();
        self.run(|c| async move { c.write_by_uuid(uuid, &v, mode).await })
    }

    pub fn write_by_handle(&self, h: Handle, v: &[u8], mode: WriteMode) -> Result<()> {
        let v = v.to_vec();
        self.run(|c| async move { c.write_by_handle(h, &v, mode).await })
    }

    pub fn write_by_uuid_async(
        &self,
        uuid: Uuid,
        v: &[u8],
        mode: WriteMode,
        f: impl FnOnce(Status) + Send + 'static,
    ) {
        let (c, v) = (Arc::clone(&self.inner), v.to_vec());
        let fut = async move { c.write_by_uuid(uuid, &v, mode).await };
        self.worker.spawn(fut, complete(move |st, ()| f(st)));
    }

    pub fn write_by_handle_async(
        &self,
        h: Handle,
        v: &[u8],
        mode: WriteMode,
        f: impl FnOnce(Status) + Send + 'static,
    ) {
        let (c, v) = (Arc::clone(&self.inner), v.to_vec());
        let fut = async move { c.write_by_handle(h, &v, mode).await };
        self.worker.spawn(fut, complete(move |st, ()| f(st)));
    }

    /// Subscribes to value changes. `f` runs on the worker thread.
    pub fn start_notify(
        &self,
        uuid: Uuid,
        f: impl FnMut(Uuid, &[u8]) + Send + 'static,
    ) -> Result<()> {
        self.run(|c| async move { c.start_notify(uuid, f).await })
    }

    pub fn stop_notify(&self, uuid: Uuid) -> Result<()> {
        self.run(|c| async move { c.stop_notify(uuid).await })
    }
}
