use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;
use crate::subsystems::Rgbw;

const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const REPORT_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", ISO_FORMAT];
const COMPACT_LEN: usize = 14;

// Background noise thresholds (dBm) for the status indicator.
pub const STRONG_RSSI_DBM: i32 = -91;
pub const WEAK_RSSI_DBM: i32 = -95;

const BAND_LEVEL: u8 = 16;

/// A wall-clock instant as reported by the modem's GPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixTime(NaiveDateTime);

impl FixTime {
    /// Parse a `$DT` payload: `YYYYMMDDhhmmss` optionally followed by `,<flag>`.
    pub fn parse_compact(payload: &str) -> Option<Self> {
        let digits = payload.get(..COMPACT_LEN)?;
        NaiveDateTime::parse_from_str(digits, COMPACT_FORMAT)
            .ok()
            .map(Self)
    }

    /// Parse the `YYYY-MM-DDThh:mm:ss` form used in persisted records.
    pub fn parse_iso(text: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(text, ISO_FORMAT).ok().map(Self)
    }

    /// Parse the `TS=` field of an `$RT` report (space or `T` separated).
    pub fn parse_report(text: &str) -> Option<Self> {
        REPORT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text.trim(), fmt).ok())
            .map(Self)
    }

    pub fn to_iso(&self) -> String {
        self.0.format(ISO_FORMAT).to_string()
    }

    /// `YYMMDDThhmmss`, short enough for one display row.
    pub fn to_display(&self) -> String {
        self.0.format("%y%m%dT%H%M%S").to_string()
    }

    pub fn unix_seconds(&self) -> i64 {
        Utc.from_utc_datetime(&self.0).timestamp()
    }
}

/// A packet heard from a satellite, from a structured `$RT` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketReport {
    pub received_at: FixTime,
    pub rssi: i32,
    pub snr: i32,
    pub fdev: i32,
    pub device_id: String,
}

impl PacketReport {
    /// Two display rows: timestamp with satellite id, then signal figures.
    pub fn display_lines(&self) -> [String; 2] {
        let device = self
            .device_id
            .strip_prefix("0x")
            .unwrap_or(&self.device_id);
        [
            format!("{} S{}", self.received_at.to_display(), device),
            format!("R:{} S:{} F:{}", self.rssi, self.snr, self.fdev),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalBand {
    Strong,
    Nominal,
    Weak,
}

impl SignalBand {
    pub fn classify(rssi: i32) -> Self {
        if rssi >= STRONG_RSSI_DBM {
            SignalBand::Strong
        } else if rssi <= WEAK_RSSI_DBM {
            SignalBand::Weak
        } else {
            SignalBand::Nominal
        }
    }

    /// Strong background noise drowns uplinks, so it shows red; a quiet band is green.
    pub fn color(self) -> Rgbw {
        match self {
            SignalBand::Strong => Rgbw::new(BAND_LEVEL, 0, 0, 0),
            SignalBand::Weak => Rgbw::new(0, BAND_LEVEL, 0, 0),
            SignalBand::Nominal => Rgbw::new(BAND_LEVEL, BAND_LEVEL, 0, 0),
        }
    }
}

/// Latest values reported by the modem. Overwritten in place, no history.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    last_fix: Option<FixTime>,
    last_network_id: Option<String>,
    last_rssi: Option<i32>,
    last_packet: Option<PacketReport>,
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fix(&self) -> Option<FixTime> {
        self.last_fix
    }

    pub fn last_network_id(&self) -> Option<&str> {
        self.last_network_id.as_deref()
    }

    pub fn last_rssi(&self) -> Option<i32> {
        self.last_rssi
    }

    pub fn last_packet(&self) -> Option<&PacketReport> {
        self.last_packet.as_ref()
    }

    /// Apply a `$DT` payload. An unparseable payload leaves the previous fix in place.
    pub fn update_fix(&mut self, payload: Option<&str>) -> Result<(), ProtocolError> {
        match payload {
            None => {
                self.last_fix = None;
                Ok(())
            }
            Some(p) => {
                let fix = FixTime::parse_compact(p)
                    .ok_or_else(|| ProtocolError::InvalidTimestamp(p.to_string()))?;
                self.last_fix = Some(fix);
                Ok(())
            }
        }
    }

    pub fn update_network_id(&mut self, payload: Option<&str>) {
        self.last_network_id = payload.map(str::to_string);
    }

    pub fn update_rssi(&mut self, rssi: i32) -> SignalBand {
        self.last_rssi = Some(rssi);
        SignalBand::classify(rssi)
    }

    pub fn record_packet(&mut self, report: PacketReport) {
        self.last_packet = Some(report);
    }
}
