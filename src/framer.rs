//! Byte-stream to text-line framing shared by the modem UART and the console socket.
//!
//! Each channel owns its own [`LineFramer`]. Bytes are accumulated into a fixed
//! capacity buffer until a linefeed arrives; backspace edits the pending line and
//! anything outside visible ASCII is dropped on the floor.

use heapless::Vec;
use static_assertions::const_assert;

pub const LINE_CAPACITY: usize = 800;

const LINE_FEED: u8 = 0x0A;
const BACKSPACE: u8 = 0x08;

// A full `$TD` submission must fit in one line.
const_assert!(LINE_CAPACITY >= crate::protocol::MAX_COMMAND_SIZE / 2);

type LineBuffer = Vec<u8, LINE_CAPACITY>;

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: LineBuffer,
}

impl LineFramer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed one byte. Returns the completed line when `byte` is a linefeed.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            LINE_FEED => {
                let line = self.buf.iter().copied().map(char::from).collect();
                self.buf.clear();
                Some(line)
            }
            BACKSPACE => {
                self.buf.pop();
                None
            }
            0x20..=0x7E => {
                // Full buffer: drop until the next linefeed.
                let _ = self.buf.push(byte);
                None
            }
            _ => None,
        }
    }

    /// Feed a chunk, collecting every line it completes.
    pub fn push_slice(&mut self, bytes: &[u8]) -> alloc::vec::Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_completes_on_linefeed() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b'$').is_none());
        assert!(framer.push(b'F').is_none());
        assert!(framer.push(b'V').is_none());
        assert_eq!(framer.push(b'\n').as_deref(), Some("$FV"));
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_carriage_return_and_controls_dropped() {
        let mut framer = LineFramer::new();
        let lines = framer.push_slice(b"$DT OK\r\x01\x7f*34\r\n");
        assert_eq!(lines, vec!["$DT OK*34".to_string()]);
    }

    #[test]
    fn test_backspace_edits_pending_line() {
        let mut framer = LineFramer::new();
        let lines = framer.push_slice(b"@shox\x08w\n");
        assert_eq!(lines, vec!["@show".to_string()]);
    }

    #[test]
    fn test_empty_line_is_still_a_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b'\n').as_deref(), Some(""));
    }
}
