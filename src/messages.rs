//! Outbound message lifecycle.
//!
//! A message is submitted under a locally generated id, accepted by the modem under
//! the modem's own id, and finally acknowledged once a satellite has taken it. The
//! tracker correlates the two ids, stamps each stage with the modem's fix time and
//! records the submit-to-acknowledge latency.

use std::collections::HashMap;
use std::fmt;

use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fault::{triage, Fault};
use crate::modem::ModemPort;
use crate::protocol::{encode_command, LinkQuality};
use crate::storage::{MessageTable, RecordStore};
use crate::telemetry::FixTime;

pub const LOCAL_ID_DIGITS: usize = 10;
pub const TRANSMIT_HISTORY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "tile_msg_id")]
    pub device_msg_id: String,
    #[serde(rename = "time_tx", default)]
    pub time_submitted: Option<String>,
    #[serde(
        rename = "time_rx_sat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub time_acknowledged: Option<String>,
}

impl MessageRecord {
    pub fn is_acknowledged(&self) -> bool {
        self.time_acknowledged.is_some()
    }
}

/// One line of the latency log: `local_id,time_submitted,latency_seconds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyRow {
    pub local_id: String,
    pub time_submitted: String,
    pub latency_seconds: i64,
}

impl fmt::Display for LatencyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.local_id, self.time_submitted, self.latency_seconds
        )
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: &'a str,
    payload: &'a str,
}

pub struct MessageTracker<S> {
    store: S,
    app_id: u32,
    records: MessageTable,
    by_device_id: HashMap<String, String>,
    // Only one submission may await acceptance at a time.
    in_flight: Option<String>,
    transmit_history: Deque<String, TRANSMIT_HISTORY>,
    persistence_failures: u32,
}

impl<S: RecordStore> MessageTracker<S> {
    /// Reload the persisted table and rebuild the device id index from it.
    pub fn load(store: S, app_id: u32) -> Self {
        let records = store.load_messages().unwrap_or_else(|e| {
            warn!(error = %e, "message table unreadable, starting empty");
            MessageTable::new()
        });
        let by_device_id = records
            .iter()
            .map(|(local, record)| (record.device_msg_id.clone(), local.clone()))
            .collect();
        info!(records = records.len(), "message table loaded");

        Self {
            store,
            app_id,
            records,
            by_device_id,
            in_flight: None,
            transmit_history: Deque::new(),
            persistence_failures: 0,
        }
    }

    /// A random 32-bit value, zero padded to ten digits.
    pub fn next_local_id() -> String {
        format!("{:0width$}", rand::random::<u32>(), width = LOCAL_ID_DIGITS)
    }

    /// Submit `payload` under a fresh local id and return that id.
    pub fn submit(&mut self, payload: &str, modem: &mut dyn ModemPort) -> Result<String, Fault> {
        let local_id = Self::next_local_id();
        self.submit_with_id(&local_id, payload, modem)?;
        Ok(local_id)
    }

    pub fn submit_with_id(
        &mut self,
        local_id: &str,
        payload: &str,
        modem: &mut dyn ModemPort,
    ) -> Result<(), Fault> {
        if self.records.contains_key(local_id) {
            // Not resolved: the earlier record is replaced on acceptance.
            warn!(local_id, "local id already in the message table");
        }

        let envelope = serde_json::to_string(&Envelope {
            id: local_id,
            payload,
        })
        .map_err(|e| Fault::Fatal(e.to_string()))?;
        let command = encode_command(&format!(
            "$TD AI={},{}",
            self.app_id,
            hex::encode(envelope.as_bytes())
        ))?;

        if let Some(previous) = self.in_flight.replace(local_id.to_string()) {
            warn!(%previous, local_id, "submission replaced one still awaiting acceptance");
        }
        modem
            .write_all(command.as_bytes())
            .map_err(Fault::Transport)?;
        info!(local_id, "message submitted");
        Ok(())
    }

    /// The modem took the in-flight submission and assigned it `device_msg_id`.
    pub fn on_accepted(&mut self, device_msg_id: &str, fix: Option<FixTime>) -> Result<(), Fault> {
        let local_id = self
            .in_flight
            .take()
            .ok_or_else(|| Fault::UnattributedAcceptance(device_msg_id.to_string()))?;

        self.records.insert(
            local_id.clone(),
            MessageRecord {
                device_msg_id: device_msg_id.to_string(),
                time_submitted: fix.map(|f| f.to_iso()),
                time_acknowledged: None,
            },
        );
        self.by_device_id
            .insert(device_msg_id.to_string(), local_id.clone());
        debug!(%local_id, device_msg_id, "message accepted");
        self.persist_table();
        Ok(())
    }

    /// A satellite acknowledged `device_msg_id`. Returns the latency row when both
    /// timestamps are known.
    pub fn on_acknowledged(
        &mut self,
        device_msg_id: &str,
        quality: &LinkQuality,
        fix: Option<FixTime>,
    ) -> Result<Option<LatencyRow>, Fault> {
        let unknown = || Fault::UnknownMessage(device_msg_id.to_string());
        let local_id = self.by_device_id.get(device_msg_id).ok_or_else(unknown)?.clone();
        let record = self.records.get_mut(&local_id).ok_or_else(unknown)?;

        record.time_acknowledged = fix.map(|f| f.to_iso());
        debug!(
            %local_id,
            rssi = quality.rssi,
            snr = quality.snr,
            fdev = quality.fdev,
            "message acknowledged"
        );

        let submitted = record.time_submitted.as_deref().and_then(FixTime::parse_iso);
        let row = match (submitted, fix) {
            (Some(submitted), Some(acknowledged)) => Some(LatencyRow {
                local_id: local_id.clone(),
                time_submitted: submitted.to_iso(),
                latency_seconds: acknowledged.unix_seconds() - submitted.unix_seconds(),
            }),
            _ => {
                warn!(%local_id, "missing timestamp, latency not recorded");
                None
            }
        };

        self.persist_table();
        if let Some(row) = &row {
            let result = self.store.append_latency(row).map_err(Fault::from);
            self.absorb(result);
        }
        Ok(row)
    }

    /// Remember a raw `$TD` line for diagnostics, dropping the oldest.
    pub fn note_transmit_line(&mut self, line: &str) {
        if self.transmit_history.is_full() {
            self.transmit_history.pop_front();
        }
        let _ = self.transmit_history.push_back(line.to_string());
    }

    fn persist_table(&mut self) {
        let result = self.store.save_messages(&self.records).map_err(Fault::from);
        self.absorb(result);
    }

    // Persistence is fail-soft: the in-memory table stays authoritative.
    fn absorb(&mut self, result: Result<(), Fault>) {
        if result.is_err() {
            self.persistence_failures = self.persistence_failures.saturating_add(1);
        }
        if let Err(fault) = triage(result) {
            warn!(%fault, "unexpected escalation from storage");
        }
    }

    pub fn records(&self) -> &MessageTable {
        &self.records
    }

    pub fn record(&self, local_id: &str) -> Option<&MessageRecord> {
        self.records.get(local_id)
    }

    pub fn local_id_for(&self, device_msg_id: &str) -> Option<&str> {
        self.by_device_id.get(device_msg_id).map(String::as_str)
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn transmit_history(&self) -> impl Iterator<Item = &str> {
        self.transmit_history.iter().map(String::as_str)
    }

    pub fn persistence_failures(&self) -> u32 {
        self.persistence_failures
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ScriptedModem;
    use crate::storage::MemoryStore;

    fn fix(compact: &str) -> Option<FixTime> {
        FixTime::parse_compact(compact)
    }

    #[test]
    fn test_local_id_is_ten_digits() {
        for _ in 0..32 {
            let id = MessageTracker::<MemoryStore>::next_local_id();
            assert_eq!(id.len(), LOCAL_ID_DIGITS);
            assert!(id.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_submit_frames_hex_envelope() {
        let modem = ScriptedModem::new();
        let mut port = modem.clone();
        let mut tracker = MessageTracker::load(MemoryStore::new(), 123);
        tracker
            .submit_with_id("0000000042", "2021-04-08T19:51:23", &mut port)
            .unwrap();

        let json = r#"{"id":"0000000042","payload":"2021-04-08T19:51:23"}"#;
        let expected = encode_command(&format!("$TD AI=123,{}", hex::encode(json))).unwrap();
        assert_eq!(modem.written(), expected.as_str());
        assert_eq!(tracker.in_flight(), Some("0000000042"));
    }

    #[test]
    fn test_acceptance_without_submission_is_dropped() {
        let mut tracker = MessageTracker::load(MemoryStore::new(), 123);
        assert!(matches!(
            tracker.on_accepted("7", None),
            Err(Fault::UnattributedAcceptance(_))
        ));
        assert!(tracker.records().is_empty());
    }

    #[test]
    fn test_transmit_history_keeps_last_ten() {
        let mut tracker = MessageTracker::load(MemoryStore::new(), 123);
        for i in 0..15 {
            tracker.note_transmit_line(&format!("$TD OK,{}", i));
        }
        let kept: Vec<&str> = tracker.transmit_history().collect();
        assert_eq!(kept.len(), TRANSMIT_HISTORY);
        assert_eq!(kept[0], "$TD OK,5");
        assert_eq!(kept[9], "$TD OK,14");
    }

    #[test]
    fn test_latency_uses_epoch_difference() {
        let modem = ScriptedModem::new();
        let mut port = modem.clone();
        let store = MemoryStore::new();
        let mut tracker = MessageTracker::load(store.clone(), 123);
        tracker.submit_with_id("0000000001", "x", &mut port).unwrap();
        tracker.on_accepted("9", fix("20211231235930")).unwrap();
        let quality = LinkQuality { rssi: -100, snr: 5, fdev: 12 };
        let row = tracker
            .on_acknowledged("9", &quality, fix("20220101000100"))
            .unwrap()
            .unwrap();
        assert_eq!(row.latency_seconds, 90);
        assert_eq!(store.latency_rows(), vec!["0000000001,2021-12-31T23:59:30,90"]);
    }
}
