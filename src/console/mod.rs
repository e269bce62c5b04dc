//! Remote command console.
//!
//! A single-connection TCP server. Every received line is both a candidate
//! administrative command (lines starting with `@`, see [`commands`]) and raw input
//! for the modem, so the connection doubles as a transparent modem terminal.

pub mod commands;

pub use commands::{execute, AdminCommand, CommandContext, CommandOutcome, SetCommand};

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::fault::Fault;
use crate::framer::LineFramer;
use crate::modem::RemoteLog;
use crate::telemetry::FixTime;

pub const DEFAULT_PORT: u16 = 23;
pub const RECV_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Connected,
}

#[derive(Debug)]
pub struct ConsoleServer {
    listener: Option<TcpListener>,
    connection: Option<TcpStream>,
    framer: LineFramer,
    accepted: u32,
}

impl ConsoleServer {
    pub fn bind(addr: SocketAddr) -> Result<Self, Fault> {
        let listener = TcpListener::bind(addr).map_err(|e| Fault::Peripheral {
            device: "console",
            reason: e.to_string(),
        })?;
        listener
            .set_nonblocking(true)
            .map_err(Fault::Transport)?;
        info!(addr = ?listener.local_addr().ok(), "console listening");
        Ok(Self {
            listener: Some(listener),
            ..Self::disabled()
        })
    }

    /// A console with no listener, used when the network is down.
    pub fn disabled() -> Self {
        Self {
            listener: None,
            connection: None,
            framer: LineFramer::new(),
            accepted: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.listener.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        if self.connection.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Listening
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Connections accepted since start.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// Accept a connection or read what the current one has sent. Returns the lines
    /// completed by this poll.
    pub fn poll(&mut self) -> Result<Vec<String>, Fault> {
        let Some(listener) = &self.listener else {
            return Ok(Vec::new());
        };

        if self.connection.is_none() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).map_err(Fault::Transport)?;
                    info!(%peer, "console connected");
                    self.connection = Some(stream);
                    self.framer.clear();
                    self.accepted = self.accepted.saturating_add(1);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(Fault::Transport(e)),
            }
            return Ok(Vec::new());
        }

        let mut buf = [0u8; RECV_BUFFER];
        let received = match self.connection.as_mut() {
            Some(stream) => stream.read(&mut buf),
            None => return Ok(Vec::new()),
        };
        match received {
            Ok(0) => {
                self.close();
                Ok(Vec::new())
            }
            Ok(n) => Ok(self.framer.push_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => {
                self.close();
                Err(Fault::Transport(e))
            }
        }
    }

    /// Write `text` verbatim. Failures are dropped.
    pub fn send(&mut self, text: &str) {
        let Some(stream) = &mut self.connection else {
            return;
        };
        if let Err(e) = stream.write_all(text.as_bytes()) {
            debug!(error = %e, "console write failed");
        }
    }

    /// Write each line followed by a linefeed.
    pub fn reply(&mut self, lines: &[String]) {
        for line in lines {
            self.send(line);
            self.send("\n");
        }
    }

    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            info!("console disconnected, accepting connections");
        }
        self.framer.clear();
    }
}

impl RemoteLog for ConsoleServer {
    fn log(&mut self, stamp: Option<FixTime>, text: &str) {
        if self.connection.is_none() {
            return;
        }
        if let Some(fix) = stamp {
            self.send(&fix.to_iso());
            self.send(" ");
        }
        self.send(text);
        self.send("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn poll_until<F: FnMut(&mut ConsoleServer) -> bool>(server: &mut ConsoleServer, mut done: F) {
        for _ in 0..500 {
            if done(server) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_disabled_console_is_inert() {
        let mut server = ConsoleServer::disabled();
        assert!(server.poll().unwrap().is_empty());
        assert_eq!(server.state(), ConnectionState::Listening);
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_accept_read_and_close() {
        let mut server = ConsoleServer::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = server.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();

        poll_until(&mut server, |s| {
            s.poll().unwrap();
            s.state() == ConnectionState::Connected
        });

        client.write_all(b"@show\n").unwrap();
        let mut lines = Vec::new();
        poll_until(&mut server, |s| {
            lines.extend(s.poll().unwrap());
            !lines.is_empty()
        });
        assert_eq!(lines, vec!["@show".to_string()]);

        drop(client);
        poll_until(&mut server, |s| {
            let _ = s.poll();
            s.state() == ConnectionState::Listening
        });
        assert_eq!(server.accepted(), 1);
    }
}
