//! Modem bring-up handshake.
//!
//! A fixed table of steps, each naming the command to send, the token that proves
//! it worked, and how long to wait. Any timeout starts the whole sequence over: the
//! handshake as a whole is the retry unit.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::fault::Fault;
use crate::protocol::encode_command;

use super::ModemPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BringupState {
    SendVersionQuery,
    AwaitVersion,
    AwaitReset,
    AwaitDateTime,
    AwaitGpsStatus,
    AwaitNetworkId,
    AwaitRegistration,
    Configured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringupStep {
    pub state: BringupState,
    pub command: Option<&'static str>,
    /// Substring of an inbound line that satisfies the step. `None` means the step
    /// completes as soon as its command is written.
    pub expect: Option<&'static str>,
    pub timeout: Duration,
    pub on_success: BringupState,
    pub on_timeout: BringupState,
}

const fn step(
    state: BringupState,
    command: Option<&'static str>,
    expect: Option<&'static str>,
    timeout_secs: u64,
    on_success: BringupState,
) -> BringupStep {
    BringupStep {
        state,
        command,
        expect,
        timeout: Duration::from_secs(timeout_secs),
        on_success,
        on_timeout: BringupState::SendVersionQuery,
    }
}

use self::BringupState::*;

pub static STEPS: [BringupStep; 7] = [
    step(SendVersionQuery, Some("$FV"), None, 0, AwaitVersion),
    step(AwaitVersion, None, Some("$FV 20"), 4, AwaitReset),
    step(AwaitReset, Some("$RS"), Some("$TILE BOOT,RUNNING"), 30, AwaitDateTime),
    step(AwaitDateTime, Some("$DT 5"), Some("$DT OK"), 4, AwaitGpsStatus),
    step(AwaitGpsStatus, Some("$GS 5"), Some("$GS OK"), 4, AwaitNetworkId),
    step(AwaitNetworkId, Some("$GN 5"), Some("$GN OK"), 4, AwaitRegistration),
    step(AwaitRegistration, Some("$RT 5"), Some("$RT OK"), 4, Configured),
];

impl BringupState {
    /// The step descriptor, or `None` for the terminal state.
    pub fn step(self) -> Option<&'static BringupStep> {
        STEPS.iter().find(|s| s.state == self)
    }
}

/// What one call to [`BringupMachine::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupEvent {
    Waiting,
    Advanced { to: BringupState },
    TimedOut { from: BringupState },
    Configured,
}

#[derive(Debug)]
pub struct BringupMachine {
    state: BringupState,
    deadline: Duration,
    satisfied: bool,
    started: bool,
    restarts: u32,
}

impl BringupMachine {
    pub fn new() -> Self {
        Self {
            state: SendVersionQuery,
            deadline: Duration::ZERO,
            satisfied: false,
            started: false,
            restarts: 0,
        }
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.state == Configured
    }

    /// Times the sequence has started over after a timeout.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Send the current step's command and arm its deadline. Steps with nothing to
    /// wait for fall straight through to their successor.
    pub fn advance(&mut self, modem: &mut dyn ModemPort, now: Duration) -> Result<(), Fault> {
        self.started = true;
        while let Some(step) = self.state.step() {
            if let Some(command) = step.command {
                let framed = encode_command(command)?;
                let mut out = Vec::with_capacity(framed.len() + 1);
                // A bare linefeed flushes whatever partial input the modem holds.
                out.push(b'\n');
                out.extend_from_slice(framed.as_bytes());
                modem.write_all(&out).map_err(Fault::Transport)?;
                debug!(command, state = ?step.state, "bring-up command sent");
            }
            self.satisfied = false;
            self.deadline = now + step.timeout;
            if step.expect.is_some() {
                return Ok(());
            }
            self.state = step.on_success;
        }
        Ok(())
    }

    /// Test a validated inbound line against the current step's token.
    pub fn observe(&mut self, line: &str) {
        let Some(expect) = self.state.step().and_then(|s| s.expect) else {
            return;
        };
        if line.contains(expect) {
            debug!(state = ?self.state, line, "bring-up step satisfied");
            self.satisfied = true;
        }
    }

    pub fn poll(&mut self, modem: &mut dyn ModemPort, now: Duration) -> Result<BringupEvent, Fault> {
        let Some(step) = self.state.step() else {
            return Ok(BringupEvent::Configured);
        };
        if !self.started {
            self.advance(modem, now)?;
            return Ok(BringupEvent::Advanced { to: self.state });
        }

        if self.satisfied {
            self.state = step.on_success;
            if self.is_configured() {
                info!("modem configured");
                return Ok(BringupEvent::Configured);
            }
            self.advance(modem, now)?;
            return Ok(BringupEvent::Advanced { to: self.state });
        }

        if now >= self.deadline {
            let from = self.state;
            warn!(state = ?from, "bring-up step timed out, restarting handshake");
            self.state = step.on_timeout;
            self.restarts = self.restarts.saturating_add(1);
            self.advance(modem, now)?;
            return Ok(BringupEvent::TimedOut { from });
        }

        Ok(BringupEvent::Waiting)
    }
}

impl Default for BringupMachine {
    fn default() -> Self {
        Self::new()
    }
}
