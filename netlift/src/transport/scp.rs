//! SCP sink protocol helpers.
//!
//! The remote side runs `scp -t <location>`. Each step we send is answered
//! with a single status byte: `0` for OK, `1` for a warning and `2` for a
//! fatal error, the latter two followed by a message line.

use bytes::{Buf, BytesMut};
use memchr::memchr;

use crate::error::TransportError;

/// Messages that mean the destination has no room for the file.
const NO_SPACE_MARKERS: &[&str] = &[
    "no space",
    "insufficient",
    "not enough space",
    "disk full",
    "file system full",
    "quota exceeded",
];

/// Command that starts the remote sink.
pub fn sink_command(location: &str) -> String {
    format!("scp -t {}", location)
}

/// File header announcing mode, size and name.
pub fn file_header(size: u64, file_name: &str) -> String {
    format!("C0644 {} {}\n", size, file_name)
}

/// Status reply from the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Warning(String),
    Fatal(String),
}

impl Reply {
    /// Convert a non-OK reply into a transfer error for `path`.
    pub fn into_result(self, path: &str) -> Result<(), TransportError> {
        match self {
            Reply::Ok => Ok(()),
            Reply::Warning(message) | Reply::Fatal(message) => Err(classify(path, message)),
        }
    }
}

/// Map a sink error message onto the transport taxonomy.
pub fn classify(path: &str, message: String) -> TransportError {
    let lower = message.to_ascii_lowercase();
    if NO_SPACE_MARKERS.iter().any(|m| lower.contains(m)) {
        TransportError::InsufficientSpace {
            path: path.to_string(),
            message,
        }
    } else {
        TransportError::TransferRejected {
            path: path.to_string(),
            message,
        }
    }
}

/// Accumulates sink output until a full reply is available.
#[derive(Debug, Default)]
pub struct ReplyReader {
    buf: BytesMut,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes received from the channel.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete reply, if one has arrived.
    pub fn next_reply(&mut self) -> Option<Reply> {
        let status = *self.buf.first()?;
        match status {
            0 => {
                self.buf.advance(1);
                Some(Reply::Ok)
            }
            1 | 2 => {
                let end = memchr(b'\n', &self.buf[1..])? + 1;
                let message = String::from_utf8_lossy(&self.buf[1..end]).trim().to_string();
                self.buf.advance(end + 1);
                Some(if status == 1 {
                    Reply::Warning(message)
                } else {
                    Reply::Fatal(message)
                })
            }
            // Some sinks answer with a bare message line instead of a status byte.
            _ => {
                let end = memchr(b'\n', &self.buf)?;
                let message = String::from_utf8_lossy(&self.buf[..end]).trim().to_string();
                self.buf.advance(end + 1);
                Some(Reply::Fatal(message))
            }
        }
    }
}
