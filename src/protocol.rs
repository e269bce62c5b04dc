//! Modem line protocol.
//!
//! Every line on the UART looks like `$<TAG> <payload>*HH` where `HH` is the XOR of
//! all bytes between the leading `$` and the `*`. Outbound commands are framed with
//! [`encode_command`]; inbound lines pass through [`validate`] and then
//! [`parse_line`]. Anything that fails validation is line noise and is dropped by
//! the caller without ceremony.

use arrayvec::ArrayString;
use core::fmt::Write;
use thiserror::Error;

use crate::telemetry::{FixTime, PacketReport};

pub const MAX_COMMAND_SIZE: usize = 512;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;

/// Body the modem sends to clear a previously reported fix.
pub const DATE_TIME_CLEAR: &str = "$DT OK";
/// Body the modem sends to clear a previously reported network id.
pub const NETWORK_ID_CLEAR: &str = "$GN OK";

/// Request for the count of messages still queued in the modem.
pub const UNSENT_COUNT_QUERY: &str = "$MT C=U";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("command exceeds the 512 byte command buffer")]
    MessageTooLarge,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not a number")]
    InvalidNumber(&'static str),
    #[error("unparseable timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// Signal figures the modem attaches to a satellite acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkQuality {
    pub rssi: i32,
    pub snr: i32,
    pub fdev: i32,
}

/// Payload of an `$RT` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveReport {
    /// Background noise level only, e.g. `$RT RSSI=-104`.
    Rssi(i32),
    /// A packet heard from a satellite, with its timestamp and device id.
    Packet(PacketReport),
}

/// A validated inbound line, classified by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemLine<'a> {
    /// `$TD OK,<id>`
    Accepted { msg_id: &'a str },
    /// `$TD SENT RSSI=..,SNR=..,FDEV=..,<id>`
    Sent { quality: LinkQuality, msg_id: &'a str },
    /// `$DT <payload>`; `None` for the all-clear.
    DateTime(Option<&'a str>),
    /// `$GN <payload>`; `None` for the all-clear.
    NetworkId(Option<&'a str>),
    Receive(ReceiveReport),
    /// `$MT <count>`
    Unsent(&'a str),
    Other,
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Frame `command` as `command*HH\n`, XOR-ing every byte after the first.
pub fn encode_command(command: &str) -> Result<CommandBuffer, ProtocolError> {
    let cs = checksum(command.as_bytes().get(1..).unwrap_or_default());
    let mut out = CommandBuffer::new();
    out.try_push_str(command)
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    writeln!(out, "*{cs:02X}").map_err(|_| ProtocolError::MessageTooLarge)?;
    Ok(out)
}

/// Check the `*HH` trailer of a framed line. Returns the body (everything before
/// the `*`) when the line is well formed and the checksum matches.
pub fn validate(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !line.is_ascii() || bytes[0] != b'$' {
        return None;
    }
    let star = bytes.len() - 3;
    if bytes[star] != b'*' {
        return None;
    }
    let digits = &line[star + 1..];
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let expected = u8::from_str_radix(digits, 16).ok()?;
    let body = &line[..star];
    (checksum(&body.as_bytes()[1..]) == expected).then_some(body)
}

/// Classify a validated body.
pub fn parse_line(body: &str) -> Result<ModemLine<'_>, ProtocolError> {
    let tag = body.split(' ').next().unwrap_or_default();
    match tag {
        "$TD" => parse_transmit(body),
        "$DT" => {
            if body == DATE_TIME_CLEAR {
                return Ok(ModemLine::DateTime(None));
            }
            payload(body)
                .map(|p| ModemLine::DateTime(Some(p)))
                .ok_or(ProtocolError::MissingField("datetime"))
        }
        "$GN" => {
            if body == NETWORK_ID_CLEAR {
                return Ok(ModemLine::NetworkId(None));
            }
            payload(body)
                .map(|p| ModemLine::NetworkId(Some(p)))
                .ok_or(ProtocolError::MissingField("network id"))
        }
        "$RT" => parse_receive(body),
        "$MT" => payload(body)
            .map(ModemLine::Unsent)
            .ok_or(ProtocolError::MissingField("count")),
        _ => Ok(ModemLine::Other),
    }
}

fn payload(body: &str) -> Option<&str> {
    body.get(4..).filter(|p| !p.is_empty())
}

fn parse_transmit(body: &str) -> Result<ModemLine<'_>, ProtocolError> {
    if let Some(rest) = body.strip_prefix("$TD OK") {
        let (_, msg_id) = rest
            .split_once(',')
            .ok_or(ProtocolError::MissingField("message id"))?;
        return Ok(ModemLine::Accepted { msg_id });
    }
    if let Some(rest) = body.strip_prefix("$TD SENT ") {
        let mut parts = rest.split(',');
        let rssi = keyed_number(parts.next(), "RSSI")?;
        let snr = keyed_number(parts.next(), "SNR")?;
        let fdev = keyed_number(parts.next(), "FDEV")?;
        let msg_id = parts
            .next()
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingField("message id"))?;
        return Ok(ModemLine::Sent {
            quality: LinkQuality { rssi, snr, fdev },
            msg_id,
        });
    }
    Ok(ModemLine::Other)
}

fn parse_receive(body: &str) -> Result<ModemLine<'_>, ProtocolError> {
    let Some(fields) = payload(body) else {
        return Ok(ModemLine::Other);
    };
    if !fields.contains("RSSI") {
        return Ok(ModemLine::Other);
    }
    if !fields.contains(',') {
        let rssi = keyed_number(Some(fields), "RSSI")?;
        return Ok(ModemLine::Receive(ReceiveReport::Rssi(rssi)));
    }

    let lookup = |key: &'static str| {
        fields
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .ok_or(ProtocolError::MissingField(key))
    };
    let number = |key: &'static str| {
        lookup(key)?
            .trim()
            .parse::<i32>()
            .map_err(|_| ProtocolError::InvalidNumber(key))
    };

    let stamp = lookup("TS")?;
    let received_at = FixTime::parse_report(stamp)
        .ok_or_else(|| ProtocolError::InvalidTimestamp(stamp.to_string()))?;
    Ok(ModemLine::Receive(ReceiveReport::Packet(PacketReport {
        received_at,
        rssi: number("RSSI")?,
        snr: number("SNR")?,
        fdev: number("FDEV")?,
        device_id: lookup("DI")?.to_string(),
    })))
}

fn keyed_number(field: Option<&str>, key: &'static str) -> Result<i32, ProtocolError> {
    let (k, v) = field
        .and_then(|f| f.split_once('='))
        .ok_or(ProtocolError::MissingField(key))?;
    if k.trim() != key {
        return Err(ProtocolError::MissingField(key));
    }
    v.trim().parse().map_err(|_| ProtocolError::InvalidNumber(key))
}
