use std::fmt;
use std::net::IpAddr;

use tracing::{info, warn};

use super::{StatusDisplay, Wireless, STATUS_LINE};
use crate::config::{DeviceConfig, NetworkMode};

/// Outcome of wireless bring-up. Only an address means the console can listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Disabled,
    AccessPoint(IpAddr),
    Station(IpAddr),
    Failed,
}

impl NetworkStatus {
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            NetworkStatus::AccessPoint(addr) | NetworkStatus::Station(addr) => Some(*addr),
            NetworkStatus::Disabled | NetworkStatus::Failed => None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.address().is_some()
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Disabled => write!(f, "Wifi Disabled"),
            NetworkStatus::AccessPoint(addr) => write!(f, "AP: {}", addr),
            NetworkStatus::Station(addr) => write!(f, "IP: {}", addr),
            NetworkStatus::Failed => write!(f, "wifi failed"),
        }
    }
}

/// Start the wireless interface as configured and show the result on the status line.
/// A failure degrades to [`NetworkStatus::Failed`]; nothing else depends on it.
pub fn bring_up(
    config: &DeviceConfig,
    wireless: &mut dyn Wireless,
    display: &mut dyn StatusDisplay,
) -> NetworkStatus {
    let status = if !config.wifi_enabled() {
        NetworkStatus::Disabled
    } else {
        let result = match config.mode {
            NetworkMode::Station => wireless
                .join(&config.ssid, &config.password)
                .map(NetworkStatus::Station),
            NetworkMode::Ap => {
                let ssid = config.access_point_ssid(wireless.mac_address());
                wireless
                    .start_access_point(&ssid, &config.password)
                    .map(NetworkStatus::AccessPoint)
            }
        };
        result.unwrap_or_else(|fault| {
            warn!(%fault, "wireless bring-up failed");
            NetworkStatus::Failed
        })
    };

    info!(%status, "network");
    display.show(STATUS_LINE, &status.to_string());
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WifiState;
    use crate::subsystems::{HostWireless, PanelDisplay};
    use std::net::Ipv4Addr;

    const MAC: [u8; 6] = [0x24, 0x0a, 0xc4, 0x00, 0x3b, 0x48];

    #[test]
    fn test_access_point_uses_suffixed_ssid() {
        let wireless = HostWireless::new(MAC, IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)));
        let mut display = PanelDisplay::new();
        let status = bring_up(&DeviceConfig::default(), &mut wireless.clone(), &mut display);
        assert_eq!(status.to_string(), "AP: 192.168.4.1");
        assert_eq!(wireless.last_ssid().as_deref(), Some("swarm-3b48"));
        assert_eq!(display.line(STATUS_LINE), "AP: 192.168.4.1");
    }

    #[test]
    fn test_disabled_and_failed() {
        let mut display = PanelDisplay::new();
        let mut config = DeviceConfig::default();
        config.wifi = WifiState::Disabled;
        let mut wireless = HostWireless::unavailable(MAC);
        assert_eq!(
            bring_up(&config, &mut wireless, &mut display),
            NetworkStatus::Disabled
        );
        assert_eq!(display.line(STATUS_LINE), "Wifi Disabled");

        config.wifi = WifiState::Enabled;
        assert_eq!(
            bring_up(&config, &mut wireless, &mut display),
            NetworkStatus::Failed
        );
        assert_eq!(display.line(STATUS_LINE), "wifi failed");
    }
}
