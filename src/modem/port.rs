use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::rc::Rc;

use tracing::{debug, info};

use crate::protocol::{encode_command, validate};

const TCP_SCHEME: &str = "tcp://";

/// Non-blocking byte channel to the modem.
pub trait ModemPort {
    /// Read whatever is available. `WouldBlock` when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, io::Error>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<P: ModemPort + ?Sized> ModemPort for Box<P> {
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, io::Error> {
        (**self).read(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }
}

/// Open the modem named by `spec`: `tcp://host:port` for a networked modem (or the
/// simulator), otherwise a serial device path.
pub fn open(spec: &str, baud_rate: u32) -> io::Result<Box<dyn ModemPort>> {
    if let Some(addr) = spec.strip_prefix(TCP_SCHEME) {
        return Ok(Box::new(TcpModemPort::connect(addr)?));
    }
    open_serial(spec, baud_rate)
}

#[cfg(feature = "serial")]
fn open_serial(path: &str, baud_rate: u32) -> io::Result<Box<dyn ModemPort>> {
    Ok(Box::new(SerialModemPort::open(path, baud_rate)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(path: &str, _baud_rate: u32) -> io::Result<Box<dyn ModemPort>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("serial support not built in, cannot open {}", path),
    ))
}

#[derive(Debug)]
pub struct TcpModemPort {
    stream: TcpStream,
}

impl TcpModemPort {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        info!(addr, "modem connected over tcp");
        Ok(Self { stream })
    }
}

impl ModemPort for TcpModemPort {
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, io::Error> {
        match self.stream.read(buf) {
            Ok(0) => Err(nb::Error::Other(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.stream.write(bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub struct SerialModemPort {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialModemPort {
    const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(1);

    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Self::READ_TIMEOUT)
            .open()?;
        info!(path, baud_rate, "modem serial port open");
        Ok(Self { port })
    }
}

#[cfg(feature = "serial")]
impl ModemPort for SerialModemPort {
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, io::Error> {
        match Read::read(&mut self.port, buf) {
            Ok(0) => Err(nb::Error::WouldBlock),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)?;
        self.port.flush()
    }
}

#[derive(Debug, Default)]
struct Script {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    pending_write: Vec<u8>,
    replies: Vec<(String, Vec<String>)>,
    closed: bool,
}

impl Script {
    fn queue_line(&mut self, body: &str) {
        match encode_command(body) {
            Ok(framed) => self.inbound.extend(framed.as_bytes()),
            Err(e) => debug!(error = %e, "scripted line too long"),
        }
    }

    // Answer every complete command line that has a registered reply.
    fn answer(&mut self) {
        while let Some(end) = self.pending_write.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending_write.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line[..end]).into_owned();
            let Some(body) = validate(&text) else {
                continue;
            };
            let replies: Vec<String> = self
                .replies
                .iter()
                .filter(|(command, _)| command == body)
                .flat_map(|(_, lines)| lines.iter().cloned())
                .collect();
            for reply in replies {
                self.queue_line(&reply);
            }
        }
    }
}

/// In-memory modem driven by a test script. Clones share the same script, so one
/// handle can be given to the device while another feeds and inspects it.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModem {
    script: Rc<RefCell<Script>>,
}

impl ScriptedModem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `body` framed with a valid checksum trailer.
    pub fn feed_line(&self, body: &str) {
        self.script.borrow_mut().queue_line(body);
    }

    /// Queue raw bytes exactly as given.
    pub fn feed_raw(&self, bytes: &[u8]) {
        self.script.borrow_mut().inbound.extend(bytes);
    }

    /// Reply with `lines` whenever the device sends `command`.
    pub fn respond_to(&self, command: &str, lines: &[&str]) {
        self.script.borrow_mut().replies.push((
            command.to_string(),
            lines.iter().map(|l| (*l).to_string()).collect(),
        ));
    }

    /// Answer the whole bring-up handshake the way a healthy modem does.
    pub fn respond_to_bringup(&self) {
        self.respond_to("$FV", &["$FV 2021-09-20,20"]);
        self.respond_to("$RS", &["$RS OK", "$TILE BOOT,RUNNING"]);
        self.respond_to("$DT 5", &["$DT OK"]);
        self.respond_to("$GS 5", &["$GS OK"]);
        self.respond_to("$GN 5", &["$GN OK"]);
        self.respond_to("$RT 5", &["$RT OK"]);
    }

    pub fn clear_replies(&self) {
        self.script.borrow_mut().replies.clear();
    }

    /// Make further reads fail as if the link dropped.
    pub fn close(&self) {
        self.script.borrow_mut().closed = true;
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.script.borrow().written).into_owned()
    }

    /// Non-empty lines written so far, without their terminators.
    pub fn written_lines(&self) -> Vec<String> {
        self.written()
            .split('\n')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn take_written(&self) -> String {
        let bytes = std::mem::take(&mut self.script.borrow_mut().written);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn pending_inbound(&self) -> usize {
        self.script.borrow().inbound.len()
    }
}

impl ModemPort for ScriptedModem {
    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, io::Error> {
        let mut script = self.script.borrow_mut();
        if script.inbound.is_empty() {
            if script.closed {
                return Err(nb::Error::Other(io::ErrorKind::UnexpectedEof.into()));
            }
            return Err(nb::Error::WouldBlock);
        }
        let n = buf.len().min(script.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(script.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut script = self.script.borrow_mut();
        if script.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        script.written.extend_from_slice(bytes);
        script.pending_write.extend_from_slice(bytes);
        script.answer();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_modem_answers_commands() {
        let modem = ScriptedModem::new();
        modem.respond_to("$FV", &["$FV 2021-01-01,20"]);
        let mut port = modem.clone();
        port.write_all(b"\n$FV*10\n").unwrap();

        let mut buf = [0u8; 64];
        let n = port.read(&mut buf).unwrap();
        let line = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.starts_with("$FV 2021-01-01,20*"));
        assert!(matches!(port.read(&mut buf), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn test_closed_script_reports_eof() {
        let modem = ScriptedModem::new();
        modem.close();
        let mut port = modem.clone();
        let mut buf = [0u8; 4];
        assert!(matches!(port.read(&mut buf), Err(nb::Error::Other(_))));
    }
}
