//! Board peripherals the control plane drives or reads but does not own.
//!
//! Each one is a trait so the device can run on real hardware, on a host, or under
//! test with the shared-handle doubles in [`host`].

pub mod comms;
pub mod host;
pub mod power;

pub use comms::{bring_up, NetworkStatus};
pub use host::{
    AbsentPowerSensor, FixedPowerSensor, HostWireless, PanelDisplay, PanelIndicator,
    VirtualButton,
};
pub use power::{PowerChannel, PowerMonitor, PowerReading};

use std::net::IpAddr;

use crate::fault::Fault;
use crate::safety::Watchdog;

/// Indicator pixel driven by background noise classification.
pub const SIGNAL_PIXEL: usize = 0;
/// Indicator pixel driven by `@color`.
pub const USER_PIXEL: usize = 1;
pub const PIXEL_COUNT: usize = 2;

pub const DISPLAY_LINES: usize = 6;
pub const STATUS_LINE: usize = 0;
pub const LOG_LINE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Rgbw {
    pub const OFF: Rgbw = Rgbw::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }
}

pub trait Indicator {
    fn set(&mut self, index: usize, color: Rgbw);
}

/// Line-addressed text display.
pub trait StatusDisplay {
    fn show(&mut self, line: usize, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    None,
    Pressed,
    Released,
}

/// Debounced push button.
pub trait Button {
    fn poll(&mut self) -> ButtonEvent;
    fn is_held(&self) -> bool;
}

pub trait PowerSensor {
    fn init(&mut self) -> Result<(), Fault>;
    fn read(&mut self, channel: PowerChannel) -> Result<PowerReading, Fault>;
}

pub trait Wireless {
    fn mac_address(&self) -> [u8; 6];
    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<IpAddr, Fault>;
    fn join(&mut self, ssid: &str, password: &str) -> Result<IpAddr, Fault>;
}

/// The full set of peripherals handed to the device.
pub struct Board {
    pub indicator: Box<dyn Indicator>,
    pub display: Box<dyn StatusDisplay>,
    pub button: Box<dyn Button>,
    pub power: Box<dyn PowerSensor>,
    pub wireless: Box<dyn Wireless>,
    pub watchdog: Box<dyn Watchdog>,
}

impl Board {
    /// Blank every indicator pixel.
    pub fn blank_indicator(&mut self) {
        for index in 0..PIXEL_COUNT {
            self.indicator.set(index, Rgbw::OFF);
        }
    }
}
