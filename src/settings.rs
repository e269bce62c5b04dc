//! Host runtime settings.
//!
//! Distinct from [`DeviceConfig`](crate::config::DeviceConfig), which is the user's
//! configuration living in NVM: these settings describe the host the control plane
//! runs on (where the modem is, where files go) and are read from a TOML file.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::console::DEFAULT_PORT;
use crate::modem::DEFAULT_SUPPRESSED_TAGS;

pub const DEFAULT_APP_ID: u32 = 123;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemSettings {
    /// Serial device path, or `tcp://host:port`.
    pub port: String,
    pub baud_rate: u32,
}

impl Default for ModemSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub listen: IpAddr,
    pub port: u16,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub nvm_path: PathBuf,
    pub nvm_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            nvm_path: PathBuf::from("data/nvm.bin"),
            nvm_size: 8192,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    pub app_id: u32,
    pub send_period_secs: u64,
    pub status_period_secs: u64,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID,
            send_period_secs: 15 * 60,
            status_period_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub filter: String,
    /// Modem line tags kept off the remote log.
    pub suppressed_tags: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            suppressed_tags: DEFAULT_SUPPRESSED_TAGS.iter().map(|t| (*t).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub mac: [u8; 6],
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Pause between ticks; zero spins.
    pub idle_backoff_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { idle_backoff_ms: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub modem: ModemSettings,
    pub console: ConsoleSettings,
    pub storage: StorageSettings,
    pub messages: MessageSettings,
    pub logging: LoggingSettings,
    pub device: DeviceSettings,
    pub scheduler: SchedulerSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "no settings file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn console_addr(&self) -> SocketAddr {
        SocketAddr::new(self.console.listen, self.console.port)
    }

    pub fn send_period(&self) -> Duration {
        Duration::from_secs(self.messages.send_period_secs)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_secs(self.messages.status_period_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.scheduler.idle_backoff_ms)
    }
}
