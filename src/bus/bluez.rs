//! BlueZ over the D-Bus system bus.

use std::collections::{BTreeMap, HashMap};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use zbus::fdo::{ObjectManagerProxy, PropertiesProxy};
use zbus::names::InterfaceName;
use zbus::zvariant::{self, Dict, OwnedValue, Value};
use zbus::{dbus_interface, Connection, DBusError};

use super::*;

const SERVICE: &str = "org.bluez";
const ADAPTER: &str = "org.bluez.Adapter1";
const DEVICE: &str = "org.bluez.Device1";
const GATT_SERVICE: &str = "org.bluez.GattService1";
const GATT_CHARACTERISTIC: &str = "org.bluez.GattCharacteristic1";
const GATT_DESCRIPTOR: &str = "org.bluez.GattDescriptor1";
const BATTERY: &str = "org.bluez.Battery1";
const AGENT_MANAGER: &str = "org.bluez.AgentManager1";

type Props = HashMap<String, OwnedValue>;

impl From<zbus::Error> for Error {
    fn from(e: zbus::Error) -> Self {
        match e {
            zbus::Error::MethodError(name, msg, _) => {
                Self::domain(name.as_str(), msg.unwrap_or_default())
            }
            zbus::Error::FDO(e) => Self::from(*e),
            e => Self::Transport(e.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for Error {
    fn from(e: zbus::fdo::Error) -> Self {
        match e {
            zbus::fdo::Error::ZBus(e) => Self::from(e),
            zbus::fdo::Error::UnknownObject(msg) => Self::UnknownObject(msg),
            e => {
                let name = zbus::DBusError::name(&e).to_string();
                Self::domain(name, zbus::DBusError::description(&e).unwrap_or_default())
            }
        }
    }
}

impl From<zvariant::Error> for Error {
    fn from(e: zvariant::Error) -> Self {
        Self::Transport(format!("invalid message body: {e}"))
    }
}

/// BlueZ service reached over the system bus.
#[derive(Clone, Debug)]
pub struct BlueZ {
    conn: Connection,
}

impl BlueZ {
    /// Connects to the system bus.
    pub async fn system() -> Result<Self> {
        Ok(Self::new(Connection::system().await?))
    }

    /// Uses an existing bus connection.
    #[inline]
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn props(&self, path: &ObjectPath, iface: &'static str) -> Result<Props> {
        let p = (PropertiesProxy::builder(&self.conn).destination(SERVICE)?)
            .path(path.as_str())?
            .cache_properties(zbus::CacheProperties::No)
            .build()
            .await?;
        Ok(p.get_all(InterfaceName::from_static_str_unchecked(iface)).await?)
    }

    async fn call<B>(&self, path: &ObjectPath, iface: &str, method: &str, body: &B) -> Result<()>
    where
        B: serde::Serialize + zvariant::DynamicType,
    {
        (self.conn)
            .call_method(Some(SERVICE), path.as_str(), Some(iface), method, body)
            .await?;
        Ok(())
    }
}

impl Bus for BlueZ {
    fn objects(&self) -> BoxFuture<'_, Result<Vec<Object>>> {
        Box::pin(async move {
            let om = (ObjectManagerProxy::builder(&self.conn).destination(SERVICE)?)
                .path("/")?
                .build()
                .await?;
            let all = om.get_managed_objects().await?;
            let v: Vec<Object> = (all.into_iter())
                .filter_map(|(path, ifaces)| {
                    let f = (ifaces.keys()).fold(Ifaces::empty(), |f, i| f | iface(i.as_str()));
                    (!f.is_empty()).then(|| Object::new(path.as_str(), f))
                })
                .collect();
            trace!("GetManagedObjects: {} objects", v.len());
            Ok(v)
        })
    }

    fn device<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<DeviceInfo>> {
        Box::pin(async move {
            let p = self.props(dev, DEVICE).await?;
            let address = (str_prop(&p, "Address").and_then(|s| s.parse().ok()))
                .ok_or_else(|| invalid(dev, "Address"))?;
            Ok(DeviceInfo {
                address,
                address_type: (str_prop(&p, "AddressType").and_then(|s| s.parse().ok()))
                    .unwrap_or_default(),
                connected: bool_prop(&p, "Connected"),
                services_resolved: bool_prop(&p, "ServicesResolved"),
                uuids: p.get("UUIDs").and_then(|v| strings(v)).unwrap_or_default(),
                rssi: p.get("RSSI").and_then(|v| match **v {
                    Value::I16(v) => Some(v),
                    _ => None,
                }),
                advertising_flags: p.get("AdvertisingFlags").and_then(|v| bytes(v)),
                advertising_data: byte_map(&p, "AdvertisingData"),
                manufacturer_data: byte_map(&p, "ManufacturerData"),
                service_data: byte_map(&p, "ServiceData"),
            })
        })
    }

    fn service<'a>(&'a self, svc: &'a ObjectPath) -> BoxFuture<'a, Result<ServiceInfo>> {
        Box::pin(async move {
            let p = self.props(svc, GATT_SERVICE).await?;
            Ok(ServiceInfo {
                device: path_prop(&p, "Device").ok_or_else(|| invalid(svc, "Device"))?,
                uuid: str_prop(&p, "UUID").ok_or_else(|| invalid(svc, "UUID"))?.to_owned(),
                primary: bool_prop(&p, "Primary"),
            })
        })
    }

    fn characteristic<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<CharInfo>> {
        Box::pin(async move {
            let p = self.props(chr, GATT_CHARACTERISTIC).await?;
            Ok(CharInfo {
                service: path_prop(&p, "Service").ok_or_else(|| invalid(chr, "Service"))?,
                uuid: str_prop(&p, "UUID").ok_or_else(|| invalid(chr, "UUID"))?.to_owned(),
                flags: p.get("Flags").and_then(|v| strings(v)).unwrap_or_default(),
            })
        })
    }

    fn descriptor<'a>(&'a self, desc: &'a ObjectPath) -> BoxFuture<'a, Result<DescInfo>> {
        Box::pin(async move {
            let p = self.props(desc, GATT_DESCRIPTOR).await?;
            Ok(DescInfo {
                characteristic: (path_prop(&p, "Characteristic"))
                    .ok_or_else(|| invalid(desc, "Characteristic"))?,
                uuid: str_prop(&p, "UUID").ok_or_else(|| invalid(desc, "UUID"))?.to_owned(),
            })
        })
    }

    fn battery<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<u8>> {
        Box::pin(async move {
            let p = self.props(dev, BATTERY).await?;
            match p.get("Percentage").map(|v| &**v) {
                Some(&Value::U8(v)) => Ok(v),
                _ => Err(invalid(dev, "Percentage")),
            }
        })
    }

    fn connect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call(dev, DEVICE, "Connect", &()))
    }

    fn disconnect<'a>(&'a self, dev: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call(dev, DEVICE, "Disconnect", &()))
    }

    fn read_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        opts: Options,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let (iface, body) = (iface.to_string(), (options(&opts),));
            let msg = (self.conn)
                .call_method(Some(SERVICE), path.as_str(), Some(iface.as_str()), "ReadValue", &body)
                .await?;
            Ok(msg.body::<Vec<u8>>()?)
        })
    }

    fn write_value<'a>(
        &'a self,
        path: &'a ObjectPath,
        iface: AttrIface,
        value: Vec<u8>,
        opts: Options,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let iface = iface.to_string();
            self.call(path, &iface, "WriteValue", &(value, options(&opts))).await
        })
    }

    fn start_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call(chr, GATT_CHARACTERISTIC, "StartNotify", &()))
    }

    fn stop_notify<'a>(&'a self, chr: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call(chr, GATT_CHARACTERISTIC, "StopNotify", &()))
    }

    fn watch<'a>(&'a self, path: &'a ObjectPath) -> BoxFuture<'a, Result<Changes>> {
        Box::pin(async move {
            let p = (PropertiesProxy::builder(&self.conn).destination(SERVICE)?)
                .path(path.as_str())?
                .cache_properties(zbus::CacheProperties::No)
                .build()
                .await?;
            let mut sigs = p.receive_properties_changed().await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let path = path.clone();
            tokio::spawn(async move {
                while let Some(sig) = sigs.next().await {
                    let args = match sig.args() {
                        Ok(args) => args,
                        Err(e) => {
                            warn!("Invalid PropertiesChanged signal for {path}: {e}");
                            continue;
                        }
                    };
                    for (name, v) in args.changed_properties() {
                        if tx.send(change(name, v)).is_err() {
                            trace!("Watch for {path} dropped");
                            return;
                        }
                    }
                }
                debug!("PropertiesChanged stream for {path} ended");
            });
            Ok(rx)
        })
    }

    fn register_agent<'a>(
        &'a self,
        agent: &'a ObjectPath,
        capability: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let exported = (self.conn.object_server())
                .at(agent.as_str(), Agent1)
                .await?;
            if !exported {
                debug!("Agent object {agent} already exported");
            }
            let agent_path = zvariant::ObjectPath::try_from(agent.as_str())?;
            let r = (self.conn)
                .call_method(
                    Some(SERVICE),
                    "/org/bluez",
                    Some(AGENT_MANAGER),
                    "RegisterAgent",
                    &(agent_path, capability),
                )
                .await;
            if let Err(e) = r {
                let _ = self.conn.object_server().remove::<Agent1, _>(agent.as_str()).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn request_default_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let agent_path = zvariant::ObjectPath::try_from(agent.as_str())?;
            let root = ObjectPath::new("/org/bluez");
            self.call(&root, AGENT_MANAGER, "RequestDefaultAgent", &(agent_path,)).await
        })
    }

    fn unregister_agent<'a>(&'a self, agent: &'a ObjectPath) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let agent_path = zvariant::ObjectPath::try_from(agent.as_str())?;
            let root = ObjectPath::new("/org/bluez");
            let r = self.call(&root, AGENT_MANAGER, "UnregisterAgent", &(agent_path,)).await;
            if let Err(e) = self.conn.object_server().remove::<Agent1, _>(agent.as_str()).await {
                warn!("Failed to remove agent object {agent}: {e}");
            }
            r
        })
    }
}

/// `org.bluez.Agent1` implementation that accepts every confirmation and
/// authorization request and rejects requests for a PIN code or passkey.
#[derive(Debug)]
struct Agent1;

#[derive(Debug, DBusError)]
#[dbus_error(prefix = "org.bluez.Error")]
enum AgentError {
    #[dbus_error(zbus_error)]
    ZBus(zbus::Error),
    Rejected(String),
}

#[dbus_interface(name = "org.bluez.Agent1")]
impl Agent1 {
    fn release(&self) {
        debug!("Agent released");
    }

    fn request_pin_code(&self, device: zvariant::ObjectPath<'_>) -> std::result::Result<String, AgentError> {
        info!("PIN code requested by {device}, rejecting");
        Err(AgentError::Rejected("PIN code entry not supported".to_owned()))
    }

    fn display_pin_code(&self, device: zvariant::ObjectPath<'_>, pincode: String) {
        info!("PIN code for {device}: {pincode}");
    }

    fn request_passkey(&self, device: zvariant::ObjectPath<'_>) -> std::result::Result<u32, AgentError> {
        info!("Passkey requested by {device}, rejecting");
        Err(AgentError::Rejected("passkey entry not supported".to_owned()))
    }

    fn display_passkey(&self, device: zvariant::ObjectPath<'_>, passkey: u32, entered: u16) {
        info!("Passkey for {device}: {passkey:06} ({entered} entered)");
    }

    fn request_confirmation(&self, device: zvariant::ObjectPath<'_>, passkey: u32) {
        info!("Confirming passkey {passkey:06} for {device}");
    }

    fn request_authorization(&self, device: zvariant::ObjectPath<'_>) {
        info!("Authorizing {device}");
    }

    fn authorize_service(&self, device: zvariant::ObjectPath<'_>, uuid: String) {
        info!("Authorizing service {uuid} for {device}");
    }

    fn cancel(&self) {
        debug!("Agent request cancelled");
    }
}

/// Returns the interface flag for a D-Bus interface name.
fn iface(name: &str) -> Ifaces {
    match name {
        ADAPTER => Ifaces::ADAPTER,
        DEVICE => Ifaces::DEVICE,
        GATT_SERVICE => Ifaces::SERVICE,
        GATT_CHARACTERISTIC => Ifaces::CHARACTERISTIC,
        GATT_DESCRIPTOR => Ifaces::DESCRIPTOR,
        BATTERY => Ifaces::BATTERY,
        _ => Ifaces::empty(),
    }
}

/// Converts a property change into a [`Change`].
fn change(name: &str, v: &Value<'_>) -> Change {
    match (name, variant(v)) {
        ("Connected", &Value::Bool(b)) => Change::Connected(b),
        ("ServicesResolved", &Value::Bool(b)) => Change::ServicesResolved(b),
        ("Value", v) => bytes(v).map_or_else(|| Change::Other(name.to_owned()), Change::Value),
        _ => Change::Other(name.to_owned()),
    }
}

/// Encodes method call options as `a{sv}`.
fn options(opts: &Options) -> HashMap<&str, Value<'_>> {
    (opts.iter())
        .map(|(k, v)| {
            let v = match *v {
                OptValue::Str(ref s) => Value::from(s.as_str()),
                OptValue::U16(v) => Value::U16(v),
            };
            (k.as_str(), v)
        })
        .collect()
}

fn invalid(path: &ObjectPath, prop: &str) -> Error {
    Error::Transport(format!("{path}: missing or invalid {prop} property"))
}

/// Removes one level of variant wrapping.
fn variant<'a>(v: &'a Value<'a>) -> &'a Value<'a> {
    match *v {
        Value::Value(ref v) => &**v,
        ref v => v,
    }
}

fn bool_prop(p: &Props, name: &str) -> bool {
    matches!(p.get(name).map(|v| &**v), Some(&Value::Bool(true)))
}

fn str_prop<'a>(p: &'a Props, name: &str) -> Option<&'a str> {
    match p.get(name).map(|v| &**v) {
        Some(Value::Str(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn path_prop(p: &Props, name: &str) -> Option<ObjectPath> {
    match p.get(name).map(|v| &**v) {
        Some(Value::ObjectPath(s)) => Some(ObjectPath::new(s.as_str())),
        _ => None,
    }
}

fn bytes(v: &Value<'_>) -> Option<Vec<u8>> {
    match *variant(v) {
        Value::Array(ref a) => (a.get().iter())
            .map(|v| match *v {
                Value::U8(b) => Some(b),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn strings(v: &Value<'_>) -> Option<Vec<String>> {
    match *variant(v) {
        Value::Array(ref a) => (a.get().iter())
            .map(|v| match *v {
                Value::Str(ref s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Decodes an `a{?v}` property whose variant values are byte arrays. Entries
/// with other value types are skipped.
fn byte_map<K>(p: &Props, name: &str) -> BTreeMap<K, Vec<u8>>
where
    K: Ord + std::hash::Hash + zvariant::Basic + for<'k> TryFrom<Value<'k>>,
    for<'k> <K as TryFrom<Value<'k>>>::Error: Into<zvariant::Error>,
{
    let Some(v) = p.get(name) else {
        return BTreeMap::new();
    };
    let m = Dict::try_from(Value::from(v.clone()))
        .and_then(HashMap::<K, OwnedValue>::try_from);
    match m {
        Ok(m) => (m.into_iter()).filter_map(|(k, v)| Some((k, bytes(&v)?))).collect(),
        Err(e) => {
            warn!("Invalid {name} property: {e}");
            BTreeMap::new()
        }
    }
}
