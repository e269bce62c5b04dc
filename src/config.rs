//! Device configuration persisted in NVM.
//!
//! The record is a compact JSON object stored at offset 0 and terminated by a NUL
//! byte. A zero first byte means "nothing stored", which is also how a factory reset
//! is expressed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{Nvm, StorageError};

pub const DEFAULT_SSID: &str = "swarm";
pub const DEFAULT_PASSWORD: &str = "12345678";
pub const DEFAULT_INTERVAL_MINUTES: i32 = 60;
pub const DEFAULT_BROKER: &str = "nootropicdesign.com";

pub const MIN_INTERVAL_MINUTES: i32 = 15;
pub const MAX_INTERVAL_MINUTES: i32 = 720;

const RECORD_OFFSET: usize = 0;
const TERMINATOR: u8 = 0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("interval {0} outside 0 or 15-720")]
    IntervalOutOfRange(i32),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Ap,
    #[serde(alias = "sta")]
    Station,
}

impl NetworkMode {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ap" => Some(NetworkMode::Ap),
            "station" | "sta" => Some(NetworkMode::Station),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkMode::Ap => "ap",
            NetworkMode::Station => "station",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WifiState {
    Enabled,
    Disabled,
}

impl WifiState {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "enabled" => Some(WifiState::Enabled),
            "disabled" => Some(WifiState::Disabled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WifiState::Enabled => "enabled",
            WifiState::Disabled => "disabled",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            WifiState::Enabled => WifiState::Disabled,
            WifiState::Disabled => WifiState::Enabled,
        }
    }
}

/// Outcome of an accepted interval change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalChange {
    Off,
    Minutes(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub mode: NetworkMode,
    pub ssid: String,
    pub password: String,
    /// Reporting interval in minutes. Zero or negative means off; a negative value
    /// remembers the magnitude that was configured before it was switched off.
    pub interval: i32,
    pub wifi: WifiState,
    pub broker: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Ap,
            ssid: DEFAULT_SSID.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            interval: DEFAULT_INTERVAL_MINUTES,
            wifi: WifiState::Enabled,
            broker: DEFAULT_BROKER.to_string(),
        }
    }
}

fn interval_in_range(minutes: i32) -> bool {
    minutes == 0 || (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes)
}

impl DeviceConfig {
    /// Read the record from NVM, filling in defaults for anything missing. A corrupt
    /// record yields the defaults.
    pub fn load(nvm: &dyn Nvm) -> Self {
        let bytes = nvm.contents().get(RECORD_OFFSET..).unwrap_or_default();
        let end = bytes
            .iter()
            .position(|&b| b == TERMINATOR)
            .unwrap_or(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..end]);
        if text.is_empty() {
            info!("no stored configuration, using defaults");
            return Self::default();
        }

        let mut config: Self = match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "stored configuration unreadable, using defaults");
                return Self::default();
            }
        };
        if !interval_in_range(config.interval.saturating_abs()) {
            warn!(interval = config.interval, "stored interval invalid, resetting");
            config.interval = DEFAULT_INTERVAL_MINUTES;
        }
        config
    }

    pub fn save(&self, nvm: &mut dyn Nvm) -> Result<(), ConfigError> {
        let mut record = serde_json::to_vec(self)?;
        record.push(TERMINATOR);
        nvm.write(RECORD_OFFSET, &record)?;
        Ok(())
    }

    /// Invalidate the stored record; the next load returns defaults.
    pub fn erase(nvm: &mut dyn Nvm) -> Result<(), ConfigError> {
        nvm.write(RECORD_OFFSET, &[TERMINATOR])?;
        Ok(())
    }

    /// Apply `@set interval`. Zero switches reporting off while keeping the last
    /// magnitude in the sign.
    pub fn set_interval(&mut self, minutes: i32) -> Result<IntervalChange, ConfigError> {
        if !interval_in_range(minutes) {
            return Err(ConfigError::IntervalOutOfRange(minutes));
        }
        if minutes == 0 {
            if self.interval > 0 {
                self.interval = -self.interval;
            }
            return Ok(IntervalChange::Off);
        }
        self.interval = minutes;
        Ok(IntervalChange::Minutes(minutes))
    }

    pub fn reporting_enabled(&self) -> bool {
        self.interval > 0
    }

    pub fn wifi_enabled(&self) -> bool {
        self.wifi == WifiState::Enabled
    }

    /// SSID to advertise as an access point. The literal default gets a short tag
    /// from the last two MAC bytes so neighbouring devices are distinguishable.
    pub fn access_point_ssid(&self, mac: [u8; 6]) -> String {
        if self.ssid == DEFAULT_SSID {
            format!("{}-{:02x}{:02x}", DEFAULT_SSID, mac[4], mac[5])
        } else {
            self.ssid.clone()
        }
    }

    /// The `@show` listing.
    pub fn summary_lines(&self) -> Vec<String> {
        let interval = if self.reporting_enabled() {
            self.interval.to_string()
        } else {
            "OFF".to_string()
        };
        vec![
            format!("wifi mode:{}", self.mode.as_str()),
            format!("wifi:{}", self.wifi.as_str()),
            format!("wifi ssid:{}", self.ssid),
            format!("wifi pw:  {}", self.password),
            format!("gps interval: {}", interval),
            format!("broker: {}", self.broker),
        ]
    }
}
