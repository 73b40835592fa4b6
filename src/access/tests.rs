use std::time::Duration;

use super::*;
use crate::bus::mock::{Call, Fixture, ADDR, DEVICE_NAME};
use crate::path::adapter_path;
use crate::uuid::{CharacteristicType, DescriptorType};
use crate::Status;

async fn connect(f: &Fixture) -> Connection {
    let addr = ADDR.parse().unwrap();
    let t = Duration::from_secs(4);
    let c = Connection::open(f.dyn_bus(), adapter_path("hci0"), addr, t, None).await;
    let c = c.unwrap();
    f.bus.clear_calls();
    c
}

fn write_opts(typ: &str) -> Options {
    Options::from([("type".to_owned(), OptValue::Str(typ.to_owned()))])
}

#[test]
fn write_mode() {
    assert_eq!(WriteMode::default(), WriteMode::WithResponse);
    assert_eq!(WriteMode::WithResponse.options(), write_opts("request"));
    assert_eq!(WriteMode::WithoutResponse.options(), write_opts("command"));
    assert_eq!(WriteMode::Reliable.options(), write_opts("reliable"));
    assert_eq!("command".parse::<WriteMode>(), Ok(WriteMode::WithoutResponse));
}

#[tokio::test]
async fn read_by_uuid() {
    let f = Fixture::new();
    let c = connect(&f).await;
    let name = Uuid::parse(DEVICE_NAME).unwrap();
    assert_eq!(c.read_by_uuid(name).await.unwrap(), b"meter");
    assert_eq!(
        f.bus.calls(),
        [Call::Read(f.name.clone(), AttrIface::Characteristic, Options::new())]
    );
    let r = c.read_by_uuid(Uuid::from_u16(0x2A01)).await;
    assert!(matches!(r, Err(Error::NotFound)));
}

#[tokio::test]
async fn read_by_handle_generic_battery() {
    let f = Fixture::new();
    let c = connect(&f).await;
    assert_eq!(c.read_by_handle(Handle::new(4)).await.unwrap(), [87]);
    assert_eq!(
        f.bus.calls(),
        [Call::Read(f.level.clone(), AttrIface::Characteristic, Options::new())]
    );
}

#[tokio::test]
async fn read_battery_interface() {
    let f = Fixture::new();
    f.bus.add_battery(&f.dev, 42);
    let c = connect(&f).await;
    let v = c.read_by_uuid(CharacteristicType::BatteryLevel.uuid()).await;
    assert_eq!(v.unwrap(), [42]);
    // Property read only, no ReadValue call
    assert!(f.bus.calls().is_empty());
    let r = (c.write_by_uuid(CharacteristicType::BatteryLevel.uuid(), &[1], WriteMode::WithResponse)).await;
    assert!(matches!(r, Err(Error::NotSupported(_))));
}

#[tokio::test]
async fn read_descriptor() {
    let f = Fixture::new();
    let d = f.bus.add_desc(&f.name, 0x0007, "2901");
    f.bus.set_value(&d, b"Name");
    let c = connect(&f).await;
    assert_eq!(c.read_by_handle(Handle::new(7)).await.unwrap(), b"Name");
    assert_eq!(
        f.bus.calls(),
        [Call::Read(d.clone(), AttrIface::Descriptor, Options::new())]
    );
    c.write_by_handle(Handle::new(7), b"Label", WriteMode::WithResponse).await.unwrap();
    assert_eq!(f.bus.value(&d), b"Label");
}

#[tokio::test]
async fn write_modes() {
    let f = Fixture::new();
    let c = connect(&f).await;
    let name = Uuid::parse(DEVICE_NAME).unwrap();
    for (mode, typ) in [
        (WriteMode::WithResponse, "request"),
        (WriteMode::Reliable, "reliable"),
    ] {
        f.bus.clear_calls();
        c.write_by_uuid(name, b"x", mode).await.unwrap();
        assert_eq!(
            f.bus.calls(),
            [Call::Write(f.name.clone(), AttrIface::Characteristic, b"x".to_vec(), write_opts(typ))]
        );
    }
    assert_eq!(f.bus.value(&f.name), b"x");
}

#[tokio::test]
async fn write_without_response_not_enforced() {
    let f = Fixture::new();
    let c = connect(&f).await;
    // 0x0006 is the value handle of a characteristic with "read" and "write"
    // flags only.
    (c.write_by_handle(Handle::new(6), &[1, 2], WriteMode::WithoutResponse)).await.unwrap();
    assert_eq!(
        f.bus.calls(),
        [Call::Write(f.name.clone(), AttrIface::Characteristic, vec![1, 2], write_opts("command"))]
    );
}

#[tokio::test]
async fn ccc_rejected() {
    let f = Fixture::new();
    let c = connect(&f).await;
    let ccc = DescriptorType::ClientCharacteristicConfiguration.uuid();
    let e = c.read_by_uuid(ccc).await.unwrap_err();
    assert_eq!(e.status(), Status::NotSupported);
    assert!(f.bus.calls().is_empty());
}

#[tokio::test]
async fn state_checks() {
    let f = Fixture::new();
    let c = connect(&f).await;
    f.bus.emit(&f.dev, crate::bus::Change::ServicesResolved(false));
    let e = c.read_by_handle(Handle::new(4)).await.unwrap_err();
    assert_eq!(e.status(), Status::Busy);
    f.bus.emit(&f.dev, crate::bus::Change::Connected(false));
    let e = c.read_by_handle(Handle::new(4)).await.unwrap_err();
    assert_eq!(e.status(), Status::NotConnected);
    assert!(f.bus.calls().is_empty());
}

#[tokio::test]
async fn backend_error() {
    let f = Fixture::new();
    let c = connect(&f).await;
    f.bus.break_object(&f.level);
    let e = c.read_by_handle(Handle::new(4)).await.unwrap_err();
    assert_eq!(e.status(), Status::BusTransport);
}
