use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use super::{PowerSensor, StatusDisplay, LOG_LINE};
use crate::fault::Fault;
use crate::scheduler::Cadence;

pub const POLL_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerChannel {
    Battery = 1,
    Solar = 2,
    Rail3v3 = 3,
}

impl PowerChannel {
    pub const ALL: [PowerChannel; 3] = [
        PowerChannel::Battery,
        PowerChannel::Solar,
        PowerChannel::Rail3v3,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PowerChannel::Battery => "BAT:",
            PowerChannel::Solar => "SOL:",
            PowerChannel::Rail3v3 => "3V3:",
        }
    }

    /// The `@show` argument naming this channel.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "battery" => Some(PowerChannel::Battery),
            "solar" => Some(PowerChannel::Solar),
            "3v3" => Some(PowerChannel::Rail3v3),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize - 1
    }

    fn next(self) -> Self {
        match self {
            PowerChannel::Battery => PowerChannel::Solar,
            PowerChannel::Solar => PowerChannel::Rail3v3,
            PowerChannel::Rail3v3 => PowerChannel::Battery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub volts: f32,
    pub amps: f32,
}

impl fmt::Display for PowerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:6.3}V {:6.3}A", self.volts, self.amps)
    }
}

/// Round-robin poller over the three power rails.
#[derive(Debug)]
pub struct PowerMonitor {
    cadence: Cadence,
    channel: PowerChannel,
    connected: bool,
    readings: [Option<PowerReading>; 3],
}

impl PowerMonitor {
    pub fn new() -> Self {
        Self {
            cadence: Cadence::new(POLL_PERIOD),
            channel: PowerChannel::Battery,
            connected: false,
            readings: [None; 3],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn reading(&self, channel: PowerChannel) -> Option<PowerReading> {
        self.readings[channel.index()]
    }

    /// The `@show battery|solar|3v3` reply.
    pub fn report(&self, channel: PowerChannel) -> String {
        match self.reading(channel) {
            Some(r) => format!("{} {:.3}V {:.3}A", channel.label(), r.volts, r.amps),
            None => format!("{} n/a", channel.label()),
        }
    }

    /// Read one channel when due. A disconnected sensor is re-initialized instead.
    pub fn poll(
        &mut self,
        sensor: &mut dyn PowerSensor,
        display: &mut dyn StatusDisplay,
        now: Duration,
    ) -> Result<(), Fault> {
        if !self.cadence.due(now) {
            return Ok(());
        }
        if !self.connected {
            return self.connect(sensor, display);
        }

        match sensor.read(self.channel) {
            Ok(reading) => {
                display.show(
                    LOG_LINE,
                    &format!("{} {}", self.channel.label(), reading),
                );
                self.readings[self.channel.index()] = Some(reading);
                self.channel = self.channel.next();
                Ok(())
            }
            Err(fault) => {
                warn!(%fault, "power sensor read failed");
                self.connected = false;
                Err(fault)
            }
        }
    }

    fn connect(
        &mut self,
        sensor: &mut dyn PowerSensor,
        display: &mut dyn StatusDisplay,
    ) -> Result<(), Fault> {
        match prime(sensor, &mut self.readings) {
            Ok(()) => {
                info!("power sensor connected");
                self.connected = true;
                Ok(())
            }
            Err(fault) => {
                display.show(LOG_LINE, "power sensor disconnected");
                Err(fault)
            }
        }
    }
}

fn prime(
    sensor: &mut dyn PowerSensor,
    readings: &mut [Option<PowerReading>; 3],
) -> Result<(), Fault> {
    sensor.init()?;
    for channel in PowerChannel::ALL {
        readings[channel.index()] = Some(sensor.read(channel)?);
    }
    Ok(())
}

impl Default for PowerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::{AbsentPowerSensor, FixedPowerSensor, PanelDisplay};

    #[test]
    fn test_unavailable_reports_na() {
        let mut monitor = PowerMonitor::new();
        let mut display = PanelDisplay::new();
        let mut sensor = AbsentPowerSensor;
        assert!(monitor
            .poll(&mut sensor, &mut display, Duration::ZERO)
            .is_err());
        assert!(!monitor.is_connected());
        assert_eq!(monitor.report(PowerChannel::Battery), "BAT: n/a");
        assert_eq!(display.line(LOG_LINE), "power sensor disconnected");
    }

    #[test]
    fn test_round_robin_every_five_seconds() {
        let mut monitor = PowerMonitor::new();
        let mut display = PanelDisplay::new();
        let mut sensor = FixedPowerSensor::new([(3.9, -0.12), (5.1, 0.25), (3.3, 0.05)]);

        monitor.poll(&mut sensor, &mut display, Duration::ZERO).unwrap();
        assert!(monitor.is_connected());
        assert_eq!(monitor.report(PowerChannel::Solar), "SOL: 5.100V 0.250A");

        monitor
            .poll(&mut sensor, &mut display, Duration::from_secs(6))
            .unwrap();
        assert_eq!(display.line(LOG_LINE), "BAT:  3.900V -0.120A");
        monitor
            .poll(&mut sensor, &mut display, Duration::from_secs(8))
            .unwrap();
        assert_eq!(display.line(LOG_LINE), "BAT:  3.900V -0.120A");
        monitor
            .poll(&mut sensor, &mut display, Duration::from_secs(12))
            .unwrap();
        assert_eq!(display.line(LOG_LINE), "SOL:  5.100V  0.250A");
    }
}
