//! # tilelink
//!
//! Control plane for a satellite-messaging field device. It brings up a
//! satellite modem over a line-oriented, checksummed serial protocol, keeps the
//! modem's clock and signal reports, submits periodic position messages and tracks
//! each one from submission through satellite acknowledgement, and exposes a TCP
//! console that takes administrative commands and relays everything else to the
//! modem.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tilelink::agent::{DeviceAgent, DeviceParts};
//! use tilelink::modem::ScriptedModem;
//! use tilelink::safety::CountingWatchdog;
//! use tilelink::scheduler::ManualClock;
//! use tilelink::settings::Settings;
//! use tilelink::storage::{MemoryNvm, MemoryStore};
//! use tilelink::subsystems::*;
//!
//! let modem = ScriptedModem::new();
//! modem.respond_to_bringup();
//!
//! let mut device = DeviceAgent::new(DeviceParts {
//!     settings: Settings::default(),
//!     modem: Box::new(modem),
//!     nvm: Box::new(MemoryNvm::new(4096)),
//!     store: Box::new(MemoryStore::new()),
//!     board: Board {
//!         indicator: Box::new(PanelIndicator::new()),
//!         display: Box::new(PanelDisplay::new()),
//!         button: Box::new(VirtualButton::new()),
//!         power: Box::new(AbsentPowerSensor),
//!         wireless: Box::new(HostWireless::unavailable([2, 0, 0, 0, 0, 1])),
//!         watchdog: Box::new(CountingWatchdog::new()),
//!     },
//!     clock: Box::new(ManualClock::new()),
//! });
//! let reason = device.run();
//! println!("restart: {}", reason);
//! ```
//!
//! ## Architecture
//!
//! - [`framer`] and [`protocol`] - byte stream to lines, checksum codec, line grammar
//! - [`modem`] - modem channel, bring-up handshake, line interpreter
//! - [`messages`] - message lifecycle and persistence of the message table
//! - [`console`] - TCP console and administrative commands
//! - [`config`] and [`storage`] - device configuration in NVM, record files
//! - [`subsystems`] - indicator, display, button, power sensor, wireless
//! - [`scheduler`], [`safety`], [`fault`] - cadences, watchdog, fault policy
//! - [`agent`] - the device and its poll loop

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;

pub mod agent;
pub mod config;
pub mod console;
pub mod fault;
pub mod framer;
pub mod messages;
pub mod modem;
pub mod protocol;
pub mod safety;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod subsystems;
pub mod telemetry;

// Re-export main public types for convenience
pub use agent::{DeviceAgent, DeviceParts};
pub use config::DeviceConfig;
pub use fault::{Fault, Policy};
pub use framer::LineFramer;
pub use messages::{MessageRecord, MessageTracker};
pub use protocol::{checksum, encode_command, validate};
pub use safety::ResetReason;
pub use settings::Settings;
