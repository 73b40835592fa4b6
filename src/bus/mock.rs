//! In-memory [`Bus`] for tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::*;
use crate::path::{adapter_path, device_path};

/// Recorded bus call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Call {
    Connect(ObjectPath),
    Disconnect(ObjectPath),
    Read(ObjectPath, AttrIface, Options),
    Write(ObjectPath, AttrIface, Vec<u8>, Options),
    StartNotify(ObjectPath),
    StopNotify(ObjectPath),
    RegisterAgent(ObjectPath, String),
    RequestDefaultAgent(ObjectPath),
    UnregisterAgent(ObjectPath),
}

/// When a device reports `ServicesResolved` after `Connect()`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) enum Resolve {
    #[default]
    OnConnect,
    After(Duration),
    Never,
}

#[derive(Debug, Default)]
struct Entry {
    path: ObjectPath,
    ifaces: Ifaces,
    device: DeviceInfo,
    battery: u8,
    service: ServiceInfo,
    chr: CharInfo,
    desc: DescInfo,
    value: Vec<u8>,
    broken: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<Entry>,
    calls: Vec<Call>,
    watchers: Vec<(ObjectPath, mpsc::UnboundedSender<Change>)>,
    resolve: Resolve,
    connect_err: Option<Error>,
    notify_delay: Option<Duration>,
}

impl State {
    fn entry(&self, path: &ObjectPath, iface: Ifaces) -> Result<&Entry> {
        (self.objects.iter())
            .find(|e| e.path == *path && e.ifaces.contains(iface))
            .ok_or_else(|| Error::UnknownObject(format!("Method call to {path} failed")))
    }

    fn entry_mut(&mut self, path: &ObjectPath, iface: Ifaces) -> Result<&mut Entry> {
        (self.objects.iter_mut())
            .find(|e| e.path == *path && e.ifaces.contains(iface))
            .ok_or_else(|| Error::UnknownObject(format!("Method call to {path} failed")))
    }

    fn open(&self, path: &ObjectPath, iface: Ifaces) -> Result<&Entry> {
        let e = self.entry(path, iface)?;
        if e.broken {
            return Err(Error::Transport(format!("failed to open {path}")));
        }
        Ok(e)
    }

    fn emit(&mut self, path: &ObjectPath, c: &Change) {
        if let Ok(e) = self.entry_mut(path, Ifaces::DEVICE) {
            match *c {
                Change::Connected(v) => e.device.connected = v,
                Change::ServicesResolved(v) => e.device.services_resolved = v,
                _ => {}
            }
        }
        (self.watchers).retain(|(p, tx)| p != path || tx.send(c.clone()).is_ok());
    }

    /// Returns whether GATT objects under `path` are visible. BlueZ only
    /// exports them once the device is resolved.
    fn visible(&self, path: &ObjectPath) -> bool {
        !(self.objects.iter()).any(|e| {
            e.ifaces.contains(Ifaces::DEVICE)
                && path.is_child_of(&e.path)
                && !e.device.services_resolved
        })
    }
}

/// In-memory BlueZ object tree. Objects are reported in insertion order,
/// which tests use to feed unsorted handles to discovery.
#[derive(Debug, Default)]
pub(crate) struct MockBus(Arc<Mutex<State>>);

impl MockBus {
    pub fn new() -> Arc<Self> {
        let b = Self::default();
        b.add(adapter_path("hci0"), Ifaces::ADAPTER);
        Arc::new(b)
    }

    fn add(&self, path: ObjectPath, ifaces: Ifaces) -> ObjectPath {
        self.0.lock().objects.push(Entry {
            path: path.clone(),
            ifaces,
            ..Entry::default()
        });
        path
    }

    fn with(&self, path: &ObjectPath, f: impl FnOnce(&mut Entry)) {
        let mut s = self.0.lock();
        let e = (s.objects.iter_mut()).find(|e| e.path == *path);
        f(e.expect("unknown mock object"));
    }

    pub fn set_resolve(&self, r: Resolve) {
        self.0.lock().resolve = r;
    }

    /// Makes `StartNotify()` complete after `d`.
    pub fn delay_start_notify(&self, d: Duration) {
        self.0.lock().notify_delay = Some(d);
    }

    pub fn fail_connect(&self, e: Error) {
        self.0.lock().connect_err = Some(e);
    }

    pub fn add_device(&self, addr: &str) -> ObjectPath {
        let a: RawAddr = addr.parse().expect("invalid address");
        let p = self.add(device_path(&adapter_path("hci0"), a), Ifaces::DEVICE);
        self.with(&p, |e| e.device.address = a);
        p
    }

    pub fn update_device(&self, dev: &ObjectPath, f: impl FnOnce(&mut DeviceInfo)) {
        self.with(dev, |e| f(&mut e.device));
    }

    pub fn add_battery(&self, dev: &ObjectPath, pct: u8) {
        self.with(dev, |e| {
            e.ifaces |= Ifaces::BATTERY;
            e.battery = pct;
        });
    }

    pub fn add_service(&self, dev: &ObjectPath, handle: u16, uuid: &str) -> ObjectPath {
        self.add_service_at(dev, &format!("service{handle:04x}"), uuid)
    }

    /// Adds a service with an arbitrary final path segment.
    pub fn add_service_at(&self, dev: &ObjectPath, name: &str, uuid: &str) -> ObjectPath {
        let p = self.add(dev.join(name), Ifaces::SERVICE);
        self.with(&p, |e| {
            e.service = ServiceInfo {
                device: dev.clone(),
                uuid: uuid.to_owned(),
                primary: true,
            }
        });
        p
    }

    pub fn set_service_device(&self, svc: &ObjectPath, dev: &ObjectPath) {
        self.with(svc, |e| e.service.device = dev.clone());
    }

    pub fn set_secondary(&self, svc: &ObjectPath) {
        self.with(svc, |e| e.service.primary = false);
    }

    pub fn add_char(&self, svc: &ObjectPath, handle: u16, uuid: &str, flags: &[&str]) -> ObjectPath {
        let p = self.add(svc.join(&format!("char{handle:04x}")), Ifaces::CHARACTERISTIC);
        self.with(&p, |e| {
            e.chr = CharInfo {
                service: svc.clone(),
                uuid: uuid.to_owned(),
                flags: flags.iter().map(|&f| f.to_owned()).collect(),
            }
        });
        p
    }

    pub fn add_desc(&self, chr: &ObjectPath, handle: u16, uuid: &str) -> ObjectPath {
        let p = self.add(chr.join(&format!("desc{handle:04x}")), Ifaces::DESCRIPTOR);
        self.with(&p, |e| {
            e.desc = DescInfo {
                characteristic: chr.clone(),
                uuid: uuid.to_owned(),
            }
        });
        p
    }

    /// Makes property reads of `path` fail with a transport error.
    pub fn break_object(&self, path: &ObjectPath) {
        self.with(path, |e| e.broken = true);
    }

    pub fn set_value(&self, path: &ObjectPath, v: &[u8]) {
        self.with(path, |e| e.value = v.to_vec());
    }

    pub fn value(&self, path: &ObjectPath) -> Vec<u8> {
        let s = self.0.lock();
        (s.objects.iter())
            .find(|e| e.path == *path)
            .map(|e| e.value.clone())
            .unwrap_or_default()
    }

    /// Injects a property change.
    pub fn emit(&self, path: &ObjectPath, c: Change) {
        self.0.lock().emit(path, &c);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    pub fn watchers(&self, path: &ObjectPath) -> usize {
        let mut s = self.0.lock();
        s.watchers.retain(|(_, tx)| !tx.is_closed());
        s.watchers.iter().filter(|(p, _)| p == path).count()
    }

    fn log(&self, c: Call) {
        self.0.lock().calls.push(c);
    }

    fn ready<'a, T: Send + 'a>(r: Result<T>) -> BoxFuture<'a, Result<T>> {
        Box::pin(std::future::ready(r))
    }
}

impl Bus for MockBus {
    fn objects(&self) -> BoxFuture<'_, Result<Vec<Object>>> {
        let s = self.0.lock();
        let v = (s.objects.iter())
            .filter(|e| s.visible(&e.path))
            .map(|e| Object::new(e.path.clone(), e.ifaces))
            .collect();
        MockBus::ready(Ok(v))
    }

    fn device<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<DeviceInfo>> {
        let r = self.0.lock().open(dev, Ifaces::DEVICE).map(|e| e.device.clone());
        MockBus::ready(r)
    }

    fn service<'a>(&'a self, svc: &'a ObjectPath) -> BoxFuture<'a, Result<ServiceInfo>> {
        let r = self.0.lock().open(svc, Ifaces::SERVICE).map(|e| e.service.clone());
        MockBus::ready(r)
    }

    fn characteristic<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<CharInfo>> {
        let r = self.0.lock().open(chr, Ifaces::CHARACTERISTIC).map(|e| e.chr.clone());
        MockBus::ready(r)
    }

    fn descriptor<'a>(&'a self, desc: &'a ObjectPath) -> BoxFuture<'a, Result<DescInfo>> {
        let r = self.0.lock().open(desc, Ifaces::DESCRIPTOR).map(|e| e.desc.clone());
        MockBus::ready(r)
    }

    fn battery<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<u8>> {
        let r = self.0.lock().open(dev, Ifaces::BATTERY).map(|e| e.battery);
        MockBus::ready(r)
    }

    fn connect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::Connect(dev.clone()));
        let mut s = self.0.lock();
        if let Some(e) = s.connect_err.clone() {
            return MockBus::ready(Err(e));
        }
        if let Err(e) = s.entry(dev, Ifaces::DEVICE) {
            return MockBus::ready(Err(e));
        }
        s.emit(dev, &Change::Connected(true));
        match s.resolve {
            Resolve::OnConnect => s.emit(dev, &Change::ServicesResolved(true)),
            Resolve::After(d) => {
                let (state, dev) = (Arc::clone(&self.0), dev.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(d).await;
                    state.lock().emit(&dev, &Change::ServicesResolved(true));
                });
            }
            Resolve::Never => {}
        }
        MockBus::ready(Ok(()))
    }

    fn disconnect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::Disconnect(dev.clone()));
        let mut s = self.0.lock();
        if let Err(e) = s.entry(dev, Ifaces::DEVICE) {
            return MockBus::ready(Err(e));
        }
        s.emit(dev, &Change::ServicesResolved(false));
        s.emit(dev, &Change::Connected(false));
        MockBus::ready(Ok(()))
    }

    fn read_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        opts: Options,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.log(Call::Read(path.clone(), iface, opts));
        let r = self.0.lock().open(path, iface.into()).map(|e| e.value.clone());
        MockBus::ready(r)
    }

    fn write_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        value: Vec<u8>,
        opts: Options,
    ) -> BoxFuture<'a, Result<()>> {
        self.log(Call::Write(path.clone(), iface, value.clone(), opts));
        let r = (self.0.lock().entry_mut(path, iface.into())).map(|e| e.value = value);
        MockBus::ready(r)
    }

    fn start_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::StartNotify(chr.clone()));
        let s = self.0.lock();
        let r = s.entry(chr, Ifaces::CHARACTERISTIC).map(|_| ());
        if let Some(d) = s.notify_delay {
            return Box::pin(async move {
                tokio::time::sleep(d).await;
                r
            });
        }
        MockBus::ready(r)
    }

    fn stop_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::StopNotify(chr.clone()));
        MockBus::ready(self.0.lock().entry(chr, Ifaces::CHARACTERISTIC).map(|_| ()))
    }

    fn watch<'a>(&'a self, path: &'a ObjectPath) -> BoxFuture<'a, Result<Changes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.lock().watchers.push((path.clone(), tx));
        MockBus::ready(Ok(rx))
    }

    fn register_agent<'a>(
        &'a self,
        agent: &'a ObjectPath,
        capability: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.log(Call::RegisterAgent(agent.clone(), capability.to_owned()));
        MockBus::ready(Ok(()))
    }

    fn request_default_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::RequestDefaultAgent(agent.clone()));
        MockBus::ready(Ok(()))
    }

    fn unregister_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        self.log(Call::UnregisterAgent(agent.clone()));
        MockBus::ready(Ok(()))
    }
}

impl From<AttrIface> for Ifaces {
    fn from(i: AttrIface) -> Self {
        match i {
            AttrIface::Characteristic => Self::CHARACTERISTIC,
            AttrIface::Descriptor => Self::DESCRIPTOR,
        }
    }
}

pub(crate) const ADDR: &str = "AA:BB:CC:DD:EE:FF";
pub(crate) const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
pub(crate) const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";
pub(crate) const DEVICE_NAME: &str = "00002a00-0000-1000-8000-00805f9b34fb";

/// Device with one service at 0x0001 and characteristics at 0x0003
/// (battery level, read) and 0x0005 (device name, read and write). Objects are
/// inserted out of handle order.
#[derive(Debug)]
pub(crate) struct Fixture {
    pub bus: Arc<MockBus>,
    pub dev: ObjectPath,
    pub svc: ObjectPath,
    pub level: ObjectPath,
    pub name: ObjectPath,
}

impl Fixture {
    pub fn new() -> Self {
        let bus = MockBus::new();
        let dev = bus.add_device(ADDR);
        let svc = bus.add_service(&dev, 0x0001, BATTERY_SERVICE);
        let name = bus.add_char(&svc, 0x0005, DEVICE_NAME, &["read", "write"]);
        let level = bus.add_char(&svc, 0x0003, BATTERY_LEVEL, &["read"]);
        bus.set_value(&level, &[87]);
        bus.set_value(&name, b"meter");
        Self {
            bus,
            dev,
            svc,
            level,
            name,
        }
    }

    /// Marks the device as connected and resolved without a `Connect()`
    /// call.
    pub fn resolved(self) -> Self {
        self.bus.update_device(&self.dev, |d| {
            d.connected = true;
            d.services_resolved = true;
        });
        self
    }

    pub fn dyn_bus(&self) -> Arc<dyn Bus> {
        Arc::clone(&self.bus) as _
    }
}
