use tracing::{debug, trace};

use crate::fault::Fault;
use crate::messages::MessageTracker;
use crate::protocol::{parse_line, ModemLine, ReceiveReport};
use crate::storage::RecordStore;
use crate::subsystems::{Indicator, StatusDisplay, SIGNAL_PIXEL};
use crate::telemetry::{FixTime, TelemetrySnapshot};

/// Tags too chatty to echo to the remote log.
pub const DEFAULT_SUPPRESSED_TAGS: [&str; 5] = ["$DT", "$RT", "$GS", "$GN", "$MT"];

pub const PACKET_TIME_LINE: usize = 4;
pub const PACKET_SIGNAL_LINE: usize = 5;

/// Sink for the device's remote log (the console connection).
pub trait RemoteLog {
    /// Emit `text`, stamped with the last known fix when there is one.
    fn log(&mut self, stamp: Option<FixTime>, text: &str);
}

/// Collects entries in memory as they would appear on the wire.
impl RemoteLog for Vec<String> {
    fn log(&mut self, stamp: Option<FixTime>, text: &str) {
        match stamp {
            Some(fix) => self.push(format!("{} {}", fix.to_iso(), text)),
            None => self.push(text.to_string()),
        }
    }
}

/// Everything a modem line may touch, borrowed from the device for one line.
pub struct LineContext<'a, S> {
    pub telemetry: &'a mut TelemetrySnapshot,
    pub tracker: &'a mut MessageTracker<S>,
    pub indicator: &'a mut dyn Indicator,
    pub display: &'a mut dyn StatusDisplay,
    pub log: &'a mut dyn RemoteLog,
    pub wifi_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LineInterpreter {
    suppressed: Vec<String>,
}

impl Default for LineInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSED_TAGS)
    }
}

impl LineInterpreter {
    pub fn new<I, T>(suppressed: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            suppressed: suppressed.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a raw modem line belongs on the remote log.
    pub fn should_echo(&self, line: &str) -> bool {
        !self.suppressed.iter().any(|tag| line.starts_with(tag.as_str()))
    }

    /// Act on one checksum-validated line body.
    pub fn interpret<S: RecordStore>(
        &self,
        body: &str,
        ctx: &mut LineContext<'_, S>,
    ) -> Result<(), Fault> {
        let line = parse_line(body)?;
        if body.starts_with("$TD") {
            ctx.tracker.note_transmit_line(body);
        }
        let fix = ctx.telemetry.last_fix();

        match line {
            ModemLine::Accepted { msg_id } => ctx.tracker.on_accepted(msg_id, fix),
            ModemLine::Sent { quality, msg_id } => {
                match ctx.tracker.on_acknowledged(msg_id, &quality, fix) {
                    Ok(Some(row)) => {
                        ctx.log.log(fix, &row.to_string());
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(fault @ Fault::UnknownMessage(_)) => {
                        ctx.log.log(fix, &format!("message {} not known", msg_id));
                        Err(fault)
                    }
                    Err(fault) => Err(fault),
                }
            }
            ModemLine::DateTime(payload) => {
                ctx.telemetry.update_fix(payload)?;
                trace!(fix = ?ctx.telemetry.last_fix(), "fix updated");
                Ok(())
            }
            ModemLine::NetworkId(payload) => {
                ctx.telemetry.update_network_id(payload);
                Ok(())
            }
            ModemLine::Receive(ReceiveReport::Rssi(rssi)) => {
                let band = ctx.telemetry.update_rssi(rssi);
                debug!(rssi, ?band, "background noise");
                if ctx.wifi_enabled {
                    ctx.indicator.set(SIGNAL_PIXEL, band.color());
                }
                Ok(())
            }
            ModemLine::Receive(ReceiveReport::Packet(report)) => {
                let [when, signal] = report.display_lines();
                ctx.display.show(PACKET_TIME_LINE, &when);
                ctx.display.show(PACKET_SIGNAL_LINE, &signal);
                ctx.telemetry.record_packet(report);
                Ok(())
            }
            ModemLine::Unsent(count) => {
                ctx.log.log(fix, &format!("unsent messages: {}", count));
                Ok(())
            }
            ModemLine::Other => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_suppression_list() {
        let interpreter = LineInterpreter::default();
        assert!(!interpreter.should_echo("$DT 20220208163620,V*4a"));
        assert!(!interpreter.should_echo("$MT 3*1b"));
        assert!(interpreter.should_echo("$TD OK,7*1e"));
        assert!(interpreter.should_echo("garbage"));
    }

    #[test]
    fn test_remote_log_vec_prefixes_fix() {
        let mut log: Vec<String> = Vec::new();
        log.log(None, "hello");
        log.log(FixTime::parse_compact("20210408195123"), "there");
        assert_eq!(log, vec!["hello", "2021-04-08T19:51:23 there"]);
    }
}
