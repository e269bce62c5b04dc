//! Host-side peripherals.
//!
//! Used when the control plane runs on a workstation, and by tests. Every type here
//! is a cheap handle over shared state: clone one, hand it to the device, and keep
//! the other to drive or inspect it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::rc::Rc;

use tracing::{debug, trace};

use super::{
    Button, ButtonEvent, Indicator, PowerChannel, PowerReading, PowerSensor, Rgbw,
    StatusDisplay, Wireless, DISPLAY_LINES, PIXEL_COUNT,
};
use crate::fault::Fault;

#[derive(Debug, Clone, Default)]
pub struct PanelIndicator {
    pixels: Rc<RefCell<[Rgbw; PIXEL_COUNT]>>,
}

impl PanelIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pixel(&self, index: usize) -> Rgbw {
        self.pixels.borrow().get(index).copied().unwrap_or(Rgbw::OFF)
    }
}

impl Indicator for PanelIndicator {
    fn set(&mut self, index: usize, color: Rgbw) {
        if let Some(pixel) = self.pixels.borrow_mut().get_mut(index) {
            if *pixel != color {
                debug!(index, ?color, "indicator");
            }
            *pixel = color;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelDisplay {
    lines: Rc<RefCell<Vec<String>>>,
}

impl PanelDisplay {
    pub fn new() -> Self {
        Self {
            lines: Rc::new(RefCell::new(vec![String::new(); DISPLAY_LINES])),
        }
    }

    pub fn line(&self, index: usize) -> String {
        self.lines.borrow().get(index).cloned().unwrap_or_default()
    }
}

impl Default for PanelDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusDisplay for PanelDisplay {
    fn show(&mut self, line: usize, text: &str) {
        if let Some(slot) = self.lines.borrow_mut().get_mut(line) {
            trace!(line, text, "display");
            text.clone_into(slot);
        }
    }
}

#[derive(Debug, Default)]
struct ButtonState {
    held: bool,
    events: VecDeque<ButtonEvent>,
}

/// Button pressed from code rather than by a finger.
#[derive(Debug, Clone, Default)]
pub struct VirtualButton {
    state: Rc<RefCell<ButtonState>>,
}

impl VirtualButton {
    pub fn new() -> Self {
        Self::default()
    }

    /// A button already held down, as at power-on for a factory reset.
    pub fn held() -> Self {
        let button = Self::new();
        button.state.borrow_mut().held = true;
        button
    }

    pub fn press(&self) {
        let mut state = self.state.borrow_mut();
        state.held = true;
        state.events.push_back(ButtonEvent::Pressed);
    }

    pub fn release(&self) {
        let mut state = self.state.borrow_mut();
        state.held = false;
        state.events.push_back(ButtonEvent::Released);
    }

    pub fn click(&self) {
        self.press();
        self.release();
    }
}

impl Button for VirtualButton {
    fn poll(&mut self) -> ButtonEvent {
        self.state
            .borrow_mut()
            .events
            .pop_front()
            .unwrap_or(ButtonEvent::None)
    }

    fn is_held(&self) -> bool {
        self.state.borrow().held
    }
}

/// No power sensor fitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsentPowerSensor;

impl PowerSensor for AbsentPowerSensor {
    fn init(&mut self) -> Result<(), Fault> {
        Err(Fault::Peripheral {
            device: "power sensor",
            reason: "not fitted".to_string(),
        })
    }

    fn read(&mut self, _channel: PowerChannel) -> Result<PowerReading, Fault> {
        self.init().map(|()| PowerReading { volts: 0.0, amps: 0.0 })
    }
}

#[derive(Debug)]
struct FixedReadings {
    readings: [(f32, f32); 3],
    connected: bool,
}

/// Sensor returning constant readings per channel, with a switchable connection.
#[derive(Debug, Clone)]
pub struct FixedPowerSensor {
    inner: Rc<RefCell<FixedReadings>>,
}

impl FixedPowerSensor {
    /// `readings` are `(volts, amps)` for battery, solar and 3v3 in that order.
    pub fn new(readings: [(f32, f32); 3]) -> Self {
        Self {
            inner: Rc::new(RefCell::new(FixedReadings {
                readings,
                connected: true,
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.borrow_mut().connected = connected;
    }

    fn unplugged() -> Fault {
        Fault::Peripheral {
            device: "power sensor",
            reason: "no response".to_string(),
        }
    }
}

impl PowerSensor for FixedPowerSensor {
    fn init(&mut self) -> Result<(), Fault> {
        if self.inner.borrow().connected {
            Ok(())
        } else {
            Err(Self::unplugged())
        }
    }

    fn read(&mut self, channel: PowerChannel) -> Result<PowerReading, Fault> {
        let inner = self.inner.borrow();
        if !inner.connected {
            return Err(Self::unplugged());
        }
        let (volts, amps) = inner.readings[channel as usize - 1];
        Ok(PowerReading { volts, amps })
    }
}

#[derive(Debug)]
struct WirelessState {
    mac: [u8; 6],
    address: Option<IpAddr>,
    last_ssid: Option<String>,
}

/// Wireless interface of a host that is already on a network; bring-up only reports
/// the address the console should listen on.
#[derive(Debug, Clone)]
pub struct HostWireless {
    state: Rc<RefCell<WirelessState>>,
}

impl HostWireless {
    pub fn new(mac: [u8; 6], address: IpAddr) -> Self {
        Self::with_address(mac, Some(address))
    }

    /// An interface that never comes up.
    pub fn unavailable(mac: [u8; 6]) -> Self {
        Self::with_address(mac, None)
    }

    fn with_address(mac: [u8; 6], address: Option<IpAddr>) -> Self {
        Self {
            state: Rc::new(RefCell::new(WirelessState {
                mac,
                address,
                last_ssid: None,
            })),
        }
    }

    /// SSID used by the most recent bring-up.
    pub fn last_ssid(&self) -> Option<String> {
        self.state.borrow().last_ssid.clone()
    }

    fn start(&mut self, ssid: &str) -> Result<IpAddr, Fault> {
        let mut state = self.state.borrow_mut();
        state.last_ssid = Some(ssid.to_string());
        state.address.ok_or_else(|| Fault::Peripheral {
            device: "wireless",
            reason: format!("cannot bring up {}", ssid),
        })
    }
}

impl Wireless for HostWireless {
    fn mac_address(&self) -> [u8; 6] {
        self.state.borrow().mac
    }

    fn start_access_point(&mut self, ssid: &str, _password: &str) -> Result<IpAddr, Fault> {
        self.start(ssid)
    }

    fn join(&mut self, ssid: &str, _password: &str) -> Result<IpAddr, Fault> {
        self.start(ssid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_events_drain_in_order() {
        let probe = VirtualButton::new();
        let mut button = probe.clone();
        probe.click();
        assert_eq!(button.poll(), ButtonEvent::Pressed);
        assert_eq!(button.poll(), ButtonEvent::Released);
        assert_eq!(button.poll(), ButtonEvent::None);
        assert!(VirtualButton::held().is_held());
    }

    #[test]
    fn test_indicator_ignores_out_of_range() {
        let probe = PanelIndicator::new();
        let mut indicator = probe.clone();
        indicator.set(1, Rgbw::new(1, 2, 3, 4));
        indicator.set(7, Rgbw::new(9, 9, 9, 9));
        assert_eq!(probe.pixel(1), Rgbw::new(1, 2, 3, 4));
        assert_eq!(probe.pixel(7), Rgbw::OFF);
    }
}
