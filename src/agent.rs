//! The device: one owner for all mutable state, driven by a cooperative poll loop.
//!
//! [`DeviceAgent::run`] performs the boot sequence (factory-reset check, blocking
//! modem bring-up, wireless and console) and then ticks forever. Each tick polls
//! every component once in a fixed order; nothing blocks. The only way out is a
//! [`ResetReason`], after which the caller rebuilds the device from persistent
//! storage.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::DeviceConfig;
use crate::console::{execute, AdminCommand, CommandContext, ConsoleServer};
use crate::fault::{triage, Fault};
use crate::framer::LineFramer;
use crate::messages::MessageTracker;
use crate::modem::{
    BringupEvent, BringupMachine, BringupState, LineContext, LineInterpreter, ModemPort, RemoteLog,
};
use crate::protocol::{encode_command, validate, UNSENT_COUNT_QUERY};
use crate::safety::ResetReason;
use crate::scheduler::{Cadence, Clock};
use crate::settings::Settings;
use crate::storage::{Nvm, RecordStore};
use crate::subsystems::{
    self, Board, ButtonEvent, NetworkStatus, PowerMonitor, LOG_LINE, STATUS_LINE,
};
use crate::telemetry::TelemetrySnapshot;

const MODEM_READ_CHUNK: usize = 64;
// Upper bound on reads per tick so a chatty modem cannot starve the other polls.
const MODEM_READS_PER_TICK: usize = 16;
const PERFORMANCE_HISTORY: usize = 16;

/// Everything the device is built from.
pub struct DeviceParts {
    pub settings: Settings,
    pub modem: Box<dyn ModemPort>,
    pub nvm: Box<dyn Nvm>,
    pub store: Box<dyn RecordStore>,
    pub board: Board,
    pub clock: Box<dyn Clock>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentState {
    pub ticks: u64,
    pub modem_lines: u32,
    pub rejected_lines: u32,
    pub console_lines: u32,
    pub messages_submitted: u32,
    pub status_requests: u32,
    pub last_fault: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceStats {
    pub loop_time_us: u32,
    pub modem_lines: u16,
    pub console_lines: u16,
}

pub struct DeviceAgent {
    settings: Settings,
    modem: Box<dyn ModemPort>,
    nvm: Box<dyn Nvm>,
    board: Board,
    clock: Box<dyn Clock>,

    config: DeviceConfig,
    telemetry: TelemetrySnapshot,
    tracker: MessageTracker<Box<dyn RecordStore>>,

    bringup: BringupMachine,
    interpreter: LineInterpreter,
    modem_framer: LineFramer,
    console: ConsoleServer,
    network: NetworkStatus,
    power: PowerMonitor,

    send_cadence: Cadence,
    status_cadence: Cadence,

    state: AgentState,
    current: PerformanceStats,
    performance_history: [PerformanceStats; PERFORMANCE_HISTORY],
    performance_index: usize,
}

impl DeviceAgent {
    /// Assemble the device, loading configuration and the message table from storage.
    pub fn new(parts: DeviceParts) -> Self {
        let DeviceParts {
            settings,
            modem,
            nvm,
            store,
            board,
            clock,
        } = parts;
        let config = DeviceConfig::load(nvm.as_ref());
        let tracker = MessageTracker::load(store, settings.messages.app_id);
        let interpreter = LineInterpreter::new(settings.logging.suppressed_tags.iter().cloned());

        Self {
            send_cadence: Cadence::new(settings.send_period()),
            status_cadence: Cadence::new(settings.status_period()),
            settings,
            modem,
            nvm,
            board,
            clock,
            config,
            telemetry: TelemetrySnapshot::new(),
            tracker,
            bringup: BringupMachine::new(),
            interpreter,
            modem_framer: LineFramer::new(),
            console: ConsoleServer::disabled(),
            network: NetworkStatus::Disabled,
            power: PowerMonitor::new(),
            state: AgentState::default(),
            current: PerformanceStats::default(),
            performance_history: [PerformanceStats::default(); PERFORMANCE_HISTORY],
            performance_index: 0,
        }
    }

    /// Boot, then tick until something asks for a restart.
    pub fn run(&mut self) -> ResetReason {
        match self.start() {
            Ok(None) => {}
            Ok(Some(reason)) => return reason,
            Err(fault) => return self.fatal(fault),
        }

        let backoff = self.settings.idle_backoff();
        loop {
            match self.tick() {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    info!(%reason, "restart requested");
                    return reason;
                }
                Err(fault) => return self.fatal(fault),
            }
            if !backoff.is_zero() {
                thread::sleep(backoff);
            }
        }
    }

    fn fatal(&mut self, fault: Fault) -> ResetReason {
        error!(%fault, "unrecoverable, restarting");
        self.state.last_fault = Some(fault.to_string());
        ResetReason::Fatal(fault.to_string())
    }

    /// Boot sequence. Returns a reset reason when the boot itself ends in a restart.
    pub fn start(&mut self) -> Result<Option<ResetReason>, Fault> {
        self.board.watchdog.feed();
        if self.board.button.is_held() {
            DeviceConfig::erase(self.nvm.as_mut())?;
            info!("button held at boot, configuration cleared");
            return Ok(Some(ResetReason::FactoryReset));
        }

        self.bring_up_modem()?;

        self.network = subsystems::bring_up(
            &self.config,
            self.board.wireless.as_mut(),
            self.board.display.as_mut(),
        );
        if self.network.is_up() {
            match ConsoleServer::bind(self.settings.console_addr()) {
                Ok(console) => self.console = console,
                Err(fault) => triage(Err(fault))?,
            }
        }
        Ok(None)
    }

    /// Blocking bring-up sub-loop. Only the modem and the watchdog are serviced.
    pub fn bring_up_modem(&mut self) -> Result<(), Fault> {
        self.board.display.show(STATUS_LINE, "Connecting to modem...");
        let backoff = self.settings.idle_backoff();
        while self.poll_bringup()? != BringupEvent::Configured {
            if !backoff.is_zero() {
                thread::sleep(backoff);
            }
        }
        Ok(())
    }

    /// One iteration of the bring-up sub-loop.
    pub fn poll_bringup(&mut self) -> Result<BringupEvent, Fault> {
        for line in self.read_modem_lines()? {
            if let Some(body) = validate(&line) {
                self.bringup.observe(body);
            }
        }
        let event = self.bringup.poll(self.modem.as_mut(), self.clock.now())?;
        self.board.watchdog.feed();
        Ok(event)
    }

    /// One pass of the poll loop, in fixed order.
    pub fn tick(&mut self) -> Result<Option<ResetReason>, Fault> {
        let started = Instant::now();
        self.current = PerformanceStats::default();
        let now = self.clock.now();

        triage(self.poll_modem())?;
        triage(self.poll_power(now))?;
        if let Some(reason) = self.poll_console()? {
            return Ok(Some(reason));
        }
        if let Some(reason) = self.poll_button()? {
            return Ok(Some(reason));
        }
        triage(self.poll_send(now))?;
        triage(self.poll_status(now))?;
        self.board.watchdog.feed();
        self.housekeeping(started);
        Ok(None)
    }

    fn read_modem_lines(&mut self) -> Result<Vec<String>, Fault> {
        let mut lines = Vec::new();
        let mut buf = [0u8; MODEM_READ_CHUNK];
        for _ in 0..MODEM_READS_PER_TICK {
            match self.modem.read(&mut buf) {
                Ok(n) => lines.extend(self.modem_framer.push_slice(&buf[..n])),
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(Fault::LinkLost(e)),
            }
        }
        Ok(lines)
    }

    fn poll_modem(&mut self) -> Result<(), Fault> {
        for line in self.read_modem_lines()? {
            self.state.modem_lines = self.state.modem_lines.saturating_add(1);
            self.current.modem_lines = self.current.modem_lines.saturating_add(1);
            let fix = self.telemetry.last_fix();
            if self.interpreter.should_echo(&line) {
                self.console.log(fix, &line);
            }

            let Some(body) = validate(&line) else {
                self.state.rejected_lines = self.state.rejected_lines.saturating_add(1);
                continue;
            };
            let mut ctx = LineContext {
                telemetry: &mut self.telemetry,
                tracker: &mut self.tracker,
                indicator: self.board.indicator.as_mut(),
                display: self.board.display.as_mut(),
                log: &mut self.console,
                wifi_enabled: self.config.wifi_enabled(),
            };
            triage(self.interpreter.interpret(body, &mut ctx))?;
        }
        Ok(())
    }

    fn poll_power(&mut self, now: Duration) -> Result<(), Fault> {
        self.power.poll(
            self.board.power.as_mut(),
            self.board.display.as_mut(),
            now,
        )
    }

    fn poll_console(&mut self) -> Result<Option<ResetReason>, Fault> {
        let lines = match self.console.poll() {
            Ok(lines) => lines,
            Err(fault) => {
                triage(Err(fault))?;
                return Ok(None);
            }
        };

        for line in lines {
            self.state.console_lines = self.state.console_lines.saturating_add(1);
            self.current.console_lines = self.current.console_lines.saturating_add(1);

            let mut reset = None;
            if line.starts_with('@') {
                let command = AdminCommand::parse(&line);
                info!(?command, "console command");
                let mut ctx = CommandContext {
                    config: &mut self.config,
                    nvm: self.nvm.as_mut(),
                    indicator: self.board.indicator.as_mut(),
                    power: &self.power,
                };
                let outcome = execute(command, &mut ctx);
                self.console.reply(&outcome.reply);
                reset = outcome.reset;
            }

            let mut raw = line.into_bytes();
            raw.push(b'\n');
            triage(self.modem.write_all(&raw).map_err(Fault::Transport))?;

            if reset.is_some() {
                return Ok(reset);
            }
        }
        Ok(None)
    }

    fn poll_button(&mut self) -> Result<Option<ResetReason>, Fault> {
        if self.board.button.poll() != ButtonEvent::Released {
            return Ok(None);
        }
        self.config.wifi = self.config.wifi.toggled();
        if !self.config.wifi_enabled() {
            self.board.blank_indicator();
        }
        triage(self.config.save(self.nvm.as_mut()).map_err(Fault::from))?;
        info!(wifi = self.config.wifi.as_str(), "wifi toggled from button");
        Ok(Some(ResetReason::WifiToggle))
    }

    fn poll_send(&mut self, now: Duration) -> Result<(), Fault> {
        let fix = self.telemetry.last_fix();
        if !self.send_cadence.due_when(now, fix.is_some()) {
            return Ok(());
        }
        let Some(fix) = fix else {
            return Ok(());
        };
        self.log("Sending message...");
        self.tracker.submit(&fix.to_iso(), self.modem.as_mut())?;
        self.state.messages_submitted = self.state.messages_submitted.saturating_add(1);
        Ok(())
    }

    fn poll_status(&mut self, now: Duration) -> Result<(), Fault> {
        let gate = self.telemetry.last_fix().is_some();
        if !self.status_cadence.due_when(now, gate) {
            return Ok(());
        }
        let command = encode_command(UNSENT_COUNT_QUERY)?;
        self.modem
            .write_all(command.as_bytes())
            .map_err(Fault::Transport)?;
        self.state.status_requests = self.state.status_requests.saturating_add(1);
        Ok(())
    }

    fn housekeeping(&mut self, started: Instant) {
        self.state.ticks = self.state.ticks.wrapping_add(1);
        self.current.loop_time_us = started.elapsed().as_micros() as u32;
        self.performance_history[self.performance_index] = self.current;
        self.performance_index = (self.performance_index + 1) % PERFORMANCE_HISTORY;
        if self.current.loop_time_us > 1_000_000 {
            warn!(loop_time_us = self.current.loop_time_us, "slow tick");
        }
    }

    /// Write to the display log line and the remote log.
    pub fn log(&mut self, text: &str) {
        self.board.display.show(LOG_LINE, text);
        self.console.log(self.telemetry.last_fix(), text);
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    pub fn tracker(&self) -> &MessageTracker<Box<dyn RecordStore>> {
        &self.tracker
    }

    pub fn bringup_state(&self) -> BringupState {
        self.bringup.state()
    }

    pub fn is_configured(&self) -> bool {
        self.bringup.is_configured()
    }

    pub fn network(&self) -> NetworkStatus {
        self.network
    }

    pub fn console(&self) -> &ConsoleServer {
        &self.console
    }

    pub fn console_addr(&self) -> Option<std::net::SocketAddr> {
        self.console.local_addr()
    }

    pub fn power(&self) -> &PowerMonitor {
        &self.power
    }

    pub fn performance_history(&self) -> &[PerformanceStats] {
        &self.performance_history
    }
}
