//! Library configuration.

use std::time::Duration;

use crate::addr::AddrType;
use crate::path::ObjectPath;

/// Pairing agent IO capability passed to `RegisterAgent`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Capability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    #[default]
    KeyboardDisplay,
}

/// Library configuration.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Adapter used when none is specified.
    pub adapter: String,
    /// Maximum time that `connect` waits for services to be resolved.
    #[serde(with = "secs")]
    pub resolve_timeout: Duration,
    /// Object path where the pairing agent is exported.
    pub agent_path: ObjectPath,
    pub agent_capability: Capability,
}

impl Config {
    /// Default adapter name.
    pub const ADAPTER: &'static str = "hci0";
    /// Default resolve wait.
    pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(4);
    /// Default agent path.
    pub const AGENT_PATH: &'static str = "/org/gattbus/agent";
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: Self::ADAPTER.to_owned(),
            resolve_timeout: Self::RESOLVE_TIMEOUT,
            agent_path: ObjectPath::new(Self::AGENT_PATH),
            agent_capability: Capability::default(),
        }
    }
}

#[cfg(feature = "fs")]
mod file {
    use std::path::Path;
    use std::{fs, io};

    use tracing::{debug, error};

    use super::Config;
    use crate::{Error, Result};

    impl Config {
        const FILE_NAME: &'static str = "gattbus.json";

        /// Loads configuration from a JSON file. A missing file yields the
        /// default configuration.
        pub fn load(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let s = match fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => {
                    debug!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                Err(e) => {
                    error!("Failed to read: {} ({e})", path.display());
                    return Err(Error::InvalidParameter(format!("{}: {e}", path.display())));
                }
            };
            serde_json::from_str(&s).map_err(|e| {
                error!("Invalid file contents: {} ({e})", path.display());
                Error::InvalidParameter(format!("{}: {e}", path.display()))
            })
        }

        /// Loads configuration from `<config dir>/<app>/gattbus.json` in the
        /// current user's configuration directory.
        pub fn per_user(app: impl AsRef<Path>) -> Result<Self> {
            let dir = dirs::config_dir().ok_or(Error::Internal("user config directory not available"))?;
            Self::load(dir.join(app.as_ref()).join(Self::FILE_NAME))
        }

        /// Saves configuration as pretty-printed JSON.
        pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
            let path = path.as_ref();
            let s = serde_json::to_string_pretty(self)
                .map_err(|e| Error::InvalidParameter(e.to_string()))?;
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|e| Error::InvalidParameter(e.to_string()))?;
            }
            fs::write(path, s).map_err(|e| {
                error!("Failed to write: {} ({e})", path.display());
                Error::InvalidParameter(format!("{}: {e}", path.display()))
            })?;
            debug!("Wrote: {}", path.display());
            Ok(())
        }
    }
}

/// Per-call connection options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Overrides [`Config::resolve_timeout`].
    pub resolve_timeout: Option<Duration>,
    /// Fails the connection if the device has a different address type.
    pub addr_type: Option<AddrType>,
}

/// Serializes a [`Duration`] as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.adapter, "hci0");
        assert_eq!(c.resolve_timeout, Duration::from_secs(4));
        assert_eq!(c.agent_capability.to_string(), "KeyboardDisplay");
    }

    #[cfg(feature = "fs")]
    #[test]
    fn load_save() {
        let tmp = (tempfile::Builder::new().prefix("gattbus-test-")).tempdir().unwrap();
        let path = tmp.path().join("app").join("gattbus.json");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"adapter": "hci1", "resolve_timeout": 10}"#).unwrap();
        let c = Config::load(&path).unwrap();
        assert_eq!(c.adapter, "hci1");
        assert_eq!(c.resolve_timeout, Duration::from_secs(10));
        assert_eq!(c.agent_path, ObjectPath::new(Config::AGENT_PATH));

        let c = Config {
            agent_capability: Capability::NoInputNoOutput,
            ..c
        };
        c.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), c);

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(Config::load(&path), Err(crate::Error::InvalidParameter(_))));
    }
}
