//! Pairing agent.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::{Capability, Config};
use crate::path::ObjectPath;
use crate::Result;

/// Pairing agent registered with the service's agent manager.
///
/// One agent is expected per process. It is created by the application
/// entry point and shared by reference with whatever needs to trigger
/// pairing. Dropping a registered agent does not unregister it.
#[derive(Debug)]
pub struct Agent {
    bus: Arc<dyn Bus>,
    path: ObjectPath,
    capability: Capability,
    registered: Mutex<bool>,
}

impl Agent {
    /// Creates an unregistered agent using the configured path and IO
    /// capability.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, cfg: &Config) -> Self {
        Self {
            bus,
            path: cfg.agent_path.clone(),
            capability: cfg.agent_capability,
            registered: Mutex::new(false),
        }
    }

    /// Returns the agent object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Returns whether the agent is registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        *self.registered.lock()
    }

    /// Registers the agent and makes it the default agent. Registering an
    /// already registered agent does nothing.
    pub async fn register(&self) -> Result<()> {
        if self.is_registered() {
            debug!("Agent {} already registered", self.path);
            return Ok(());
        }
        let cap = self.capability.to_string();
        self.bus.register_agent(&self.path, &cap).await?;
        if let Err(e) = self.bus.request_default_agent(&self.path).await {
            warn!("Failed to make {} the default agent: {e}", self.path);
            if let Err(e) = self.bus.unregister_agent(&self.path).await {
                warn!("Failed to unregister agent {}: {e}", self.path);
            }
            return Err(e.into());
        }
        *self.registered.lock() = true;
        info!("Registered agent {} ({cap})", self.path);
        Ok(())
    }

    /// Unregisters the agent. Unregistering an agent that is not registered
    /// does nothing.
    pub async fn unregister(&self) -> Result<()> {
        if !self.is_registered() {
            debug!("Agent {} not registered", self.path);
            return Ok(());
        }
        self.bus.unregister_agent(&self.path).await?;
        *self.registered.lock() = false;
        info!("Unregistered agent {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{Call, Fixture};

    #[tokio::test]
    async fn register() {
        let f = Fixture::new();
        let cfg = Config {
            agent_capability: Capability::NoInputNoOutput,
            ..Config::default()
        };
        let a = Agent::new(f.dyn_bus(), &cfg);
        assert!(!a.is_registered());
        a.register().await.unwrap();
        a.register().await.unwrap();
        assert!(a.is_registered());
        let p = ObjectPath::new(Config::AGENT_PATH);
        assert_eq!(
            f.bus.calls(),
            [
                Call::RegisterAgent(p.clone(), "NoInputNoOutput".to_owned()),
                Call::RequestDefaultAgent(p.clone()),
            ]
        );

        f.bus.clear_calls();
        a.unregister().await.unwrap();
        a.unregister().await.unwrap();
        assert!(!a.is_registered());
        assert_eq!(f.bus.calls(), [Call::UnregisterAgent(p)]);
    }
}
