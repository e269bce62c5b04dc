use std::io;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use crate::storage::StorageError;

/// Every failure the poll loop can observe, grouped by how it is handled.
#[derive(Debug, Error)]
pub enum Fault {
    /// Non-fatal I/O hiccup on a channel (would-block aside).
    #[error("transport: {0}")]
    Transport(#[source] io::Error),
    /// The modem channel itself is gone.
    #[error("modem link lost: {0}")]
    LinkLost(#[source] io::Error),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("{device} unavailable: {reason}")]
    Peripheral { device: &'static str, reason: String },
    #[error("unknown message {0}")]
    UnknownMessage(String),
    #[error("acceptance of {0} with nothing in flight")]
    UnattributedAcceptance(String),
    #[error("persistence: {0}")]
    Persistence(#[from] StorageError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Ignore,
    Log,
    Restart,
}

impl Fault {
    pub fn policy(&self) -> Policy {
        match self {
            Fault::Transport(_) | Fault::Protocol(_) | Fault::Persistence(_) => Policy::Ignore,
            Fault::Peripheral { .. }
            | Fault::UnknownMessage(_)
            | Fault::UnattributedAcceptance(_)
            | Fault::Config(_) => Policy::Log,
            Fault::LinkLost(_) | Fault::Fatal(_) => Policy::Restart,
        }
    }
}

/// Apply the policy table: swallow what is recoverable, pass restarts upward.
pub fn triage(result: Result<(), Fault>) -> Result<(), Fault> {
    match result {
        Ok(()) => Ok(()),
        Err(fault) => match fault.policy() {
            Policy::Ignore => {
                debug!(%fault, "ignored");
                Ok(())
            }
            Policy::Log => {
                warn!(%fault, "recovered");
                Ok(())
            }
            Policy::Restart => Err(fault),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(
            Fault::Protocol(ProtocolError::MissingField("x")).policy(),
            Policy::Ignore
        );
        assert_eq!(Fault::UnknownMessage("9".into()).policy(), Policy::Log);
        assert_eq!(Fault::Fatal("boom".into()).policy(), Policy::Restart);
    }

    #[test]
    fn test_triage_only_passes_restarts() {
        assert!(triage(Err(Fault::Persistence(StorageError::Unavailable))).is_ok());
        assert!(triage(Err(Fault::UnknownMessage("1".into()))).is_ok());
        assert!(triage(Err(Fault::LinkLost(io::ErrorKind::UnexpectedEof.into()))).is_err());
    }
}
