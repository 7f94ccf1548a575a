//! Line framing for link sockets
//!
//! Bytes read from a link are appended to a [`RecvQueue`]; complete lines are
//! taken out one at a time and the unread remainder stays queued for the next
//! read. A peer that fills the queue without ever sending a line delimiter is
//! misbehaving and the link is dropped.

use crate::{Error, Result};

/// Size of a single socket read and the longest line accepted from a peer
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Receive queue - holds bytes that have not formed a complete line yet
#[derive(Debug)]
pub struct RecvQueue {
    buffer: Vec<u8>,
    /// Longest line (and longest undelimited run) tolerated
    max_size: usize,
    /// Bytes handed out as lines so far
    consumed_bytes: u64,
}

impl RecvQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            consumed_bytes: 0,
        }
    }

    /// Append freshly read bytes
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete line, without its LF and any CR before it.
    ///
    /// Returns `Ok(None)` when no complete line is buffered yet and
    /// [`Error::Framing`] when the buffered data can never become a line.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > self.max_size {
                    return Err(Error::Framing(self.max_size));
                }
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                self.consumed_bytes += raw.len() as u64;
                let mut line = &raw[..raw.len() - 1];
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
            None if self.buffer.len() >= self.max_size => {
                tracing::warn!(
                    "RecvQueue full ({}/{}) without a line delimiter",
                    self.buffer.len(),
                    self.max_size
                );
                Err(Error::Framing(self.max_size))
            }
            None => Ok(None),
        }
    }

    /// Bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }
}

impl Default for RecvQueue {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
