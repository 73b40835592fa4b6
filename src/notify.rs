//! Characteristic value notifications and indications.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::access::ensure_ready;
use crate::bus::Change;
use crate::conn::{Connection, State};
use crate::path::ObjectPath;
use crate::resolve::Attribute;
use crate::uuid::Uuid;
use crate::{Error, Result};

/// Subscription entry. `path` is `None` while `start_notify` is pending.
/// An entry is only removed together with cancelling its token.
#[derive(Debug)]
struct Sub {
    path: Option<ObjectPath>,
    cancel: CancellationToken,
}

/// Active subscriptions of one connection, keyed by characteristic UUID.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions(Mutex<HashMap<Uuid, Sub>>);

impl Connection {
    /// Subscribes to notifications or indications of the characteristic
    /// with the specified UUID. The handler receives the UUID and the new
    /// value on the task servicing bus events.
    pub async fn start_notify(
        &self,
        uuid: Uuid,
        f: impl FnMut(Uuid, &[u8]) + Send + 'static,
    ) -> Result<()> {
        ensure_ready(self.bus(), self.device()).await?;
        let cancel = self.child_token();
        match self.subs.0.lock().entry(uuid) {
            Entry::Occupied(_) => {
                return Err(Error::InvalidParameter(format!(
                    "already subscribed to {uuid}"
                )))
            }
            Entry::Vacant(e) => {
                e.insert(Sub {
                    path: None,
                    cancel: cancel.clone(),
                });
            }
        }
        let path = match self.subscribe(uuid, cancel.clone(), f).await {
            Ok(path) => path,
            Err(e) => {
                if !cancel.is_cancelled() {
                    self.subs.0.lock().remove(&uuid);
                    cancel.cancel();
                }
                return Err(e);
            }
        };
        {
            let mut subs = self.subs.0.lock();
            if let (false, Some(sub)) = (cancel.is_cancelled(), subs.get_mut(&uuid)) {
                sub.path = Some(path);
                return Ok(());
            }
        }
        // Stopped while pending
        debug!("Subscription to {uuid:?} cancelled");
        if let Err(e) = self.bus().stop_notify(&path).await {
            warn!("Failed to stop notifications for {uuid:?}: {e}");
        }
        if self.state() == State::Ready {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Resolves the characteristic, starts the value watch and issues
    /// `StartNotify`.
    async fn subscribe(
        &self,
        uuid: Uuid,
        stop: CancellationToken,
        mut f: impl FnMut(Uuid, &[u8]) + Send + 'static,
    ) -> Result<ObjectPath> {
        let snap = self.snapshot()?;
        let path = match self.scope(&snap).resolve_uuid(uuid).await? {
            Some(Attribute::Characteristic(p)) => p,
            Some(_) => return Err(Error::NotSupported("notifications for this attribute")),
            None => return Err(Error::NotFound),
        };
        let mut changes = self.bus().watch(&path).await?;
        self.bus().start_notify(&path).await?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    c = changes.recv() => match c {
                        Some(Change::Value(v)) => f(uuid, &v),
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            trace!("Notifications for {uuid:?} stopped");
        });
        debug!("Subscribed to {uuid:?} at {path}");
        Ok(path)
    }

    /// Stops notifications of the characteristic with the specified UUID.
    pub async fn stop_notify(&self, uuid: Uuid) -> Result<()> {
        let sub = (self.subs.0.lock().remove(&uuid)).ok_or(Error::NotFound)?;
        sub.cancel.cancel();
        // A pending start_notify issues StopNotify itself
        if let Some(path) = sub.path {
            self.bus().stop_notify(&path).await?;
        }
        debug!("Unsubscribed from {uuid:?}");
        Ok(())
    }

    /// Stops all notifications. Failures are logged.
    pub(crate) async fn stop_all_notify(&self) {
        let subs: Vec<_> = self.subs.0.lock().drain().collect();
        for (uuid, sub) in subs {
            sub.cancel.cancel();
            let Some(path) = sub.path else { continue };
            if let Err(e) = self.bus().stop_notify(&path).await {
                warn!("Failed to stop notifications for {uuid:?}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::bus::mock::{Call, Fixture, ADDR};
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

    #[tokio::test]
    async fn values() {
        let f = Fixture::new();
        let c = connect(&f).await;
        let level = CharacteristicType::BatteryLevel.uuid();
        let (tx, mut rx) = mpsc::unbounded_channel();
        (c.start_notify(level, move |u, v| {
            let _ = tx.send((u, v.to_vec()));
        }))
        .await
        .unwrap();
        assert_eq!(f.bus.calls(), [Call::StartNotify(f.level.clone())]);

        f.bus.emit(&f.level, Change::Value(vec![86]));
        f.bus.emit(&f.name, Change::Value(vec![0]));
        f.bus.emit(&f.level, Change::Value(vec![85]));
        assert_eq!(rx.recv().await, Some((level, vec![86])));
        assert_eq!(rx.recv().await, Some((level, vec![85])));

        c.stop_notify(level).await.unwrap();
        assert_eq!(rx.recv().await, None);
        assert_eq!(f.bus.calls()[1], Call::StopNotify(f.level.clone()));
        assert!(matches!(c.stop_notify(level).await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn duplicate() {
        let f = Fixture::new();
        let c = connect(&f).await;
        let level = CharacteristicType::BatteryLevel.uuid();
        c.start_notify(level, |_, _| {}).await.unwrap();
        let r = c.start_notify(level, |_, _| {}).await;
        assert!(matches!(r, Err(Error::InvalidParameter(_))));
        assert_eq!(f.bus.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_start() {
        let f = Fixture::new();
        let c = connect(&f).await;
        f.bus.delay_start_notify(Duration::from_secs(1));
        let level = CharacteristicType::BatteryLevel.uuid();
        let (a, b) = tokio::join!(
            c.start_notify(level, |_, _| {}),
            c.start_notify(level, |_, _| {}),
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(Error::InvalidParameter(_))));
        assert_eq!(f.bus.calls(), [Call::StartNotify(f.level.clone())]);

        c.stop_notify(level).await.unwrap();
        assert_eq!(f.bus.calls()[1], Call::StopNotify(f.level.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_pending() {
        let f = Fixture::new();
        let c = connect(&f).await;
        f.bus.delay_start_notify(Duration::from_secs(1));
        let level = CharacteristicType::BatteryLevel.uuid();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (start, stop) = tokio::join!(
            c.start_notify(level, move |_, v| {
                let _ = tx.send(v.to_vec());
            }),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                c.stop_notify(level).await
            },
        );
        start.unwrap();
        stop.unwrap();
        assert_eq!(
            f.bus.calls(),
            [
                Call::StartNotify(f.level.clone()),
                Call::StopNotify(f.level.clone()),
            ]
        );
        f.bus.emit(&f.level, Change::Value(vec![1]));
        assert_eq!(rx.recv().await, None);
        assert!(matches!(c.stop_notify(level).await, Err(Error::NotFound)));

        // The entry is free again
        f.bus.delay_start_notify(Duration::ZERO);
        c.start_notify(level, |_, _| {}).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_targets() {
        let f = Fixture::new();
        f.bus.add_battery(&f.dev, 50);
        let c = connect(&f).await;
        let level = CharacteristicType::BatteryLevel.uuid();
        let e = c.start_notify(level, |_, _| {}).await.unwrap_err();
        assert_eq!(e.status(), Status::NotSupported);
        let ccc = DescriptorType::ClientCharacteristicConfiguration.uuid();
        let e = c.start_notify(ccc, |_, _| {}).await.unwrap_err();
        assert_eq!(e.status(), Status::NotSupported);
        let e = c.start_notify(Uuid::from_u16(0x2A37), |_, _| {}).await.unwrap_err();
        assert_eq!(e.status(), Status::NotFound);
        assert!(f.bus.calls().is_empty());
    }

    #[tokio::test]
    async fn disconnect_stops_all() {
        let f = Fixture::new();
        let c = connect(&f).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let level = CharacteristicType::BatteryLevel.uuid();
        c.start_notify(level, move |_, _| drop(tx.clone())).await.unwrap();
        c.disconnect().await;
        assert_eq!(
            f.bus.calls(),
            [
                Call::StartNotify(f.level.clone()),
                Call::StopNotify(f.level.clone()),
                Call::Disconnect(f.dev.clone()),
            ]
        );
        assert_eq!(rx.recv().await, None);
        assert!(matches!(c.stop_notify(level).await, Err(Error::NotFound)));
    }
}
