//! Everything that talks to the modem: the byte channel, the bring-up handshake and
//! the interpreter for lines that arrive once the modem is configured.

pub mod bringup;
pub mod interpreter;
pub mod port;

pub use bringup::{BringupEvent, BringupMachine, BringupState, BringupStep, STEPS};
pub use interpreter::{LineContext, LineInterpreter, RemoteLog, DEFAULT_SUPPRESSED_TAGS};
pub use port::{open, ModemPort, ScriptedModem, TcpModemPort};

#[cfg(feature = "serial")]
pub use port::SerialModemPort;
