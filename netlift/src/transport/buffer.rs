//! Shell output accumulation.
//!
//! Terminal escapes are removed as bytes arrive. Prompt matching looks at
//! the last `window` bytes only: a `dir` of a full flash or a `show tech`
//! can run to megabytes and the prompt is always at the end.

use bytes::BytesMut;
use memchr::memrchr;
use regex::bytes::Regex;

const DEFAULT_WINDOW: usize = 1000;

/// `vte` sink that keeps printable text, newlines and tabs.
struct Plain<'a>(&'a mut BytesMut);

impl vte::Perform for Plain<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.0.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\t') {
            self.0.extend_from_slice(&[byte]);
        }
    }
}

/// Output read from the shell since the last command was sent.
pub(crate) struct ShellBuffer {
    text: BytesMut,
    parser: vte::Parser,
    window: usize,
}

impl ShellBuffer {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            text: BytesMut::with_capacity(4096),
            parser: vte::Parser::new(),
            window,
        }
    }

    /// Append raw channel data. Escape sequences may be split across calls.
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.parser.advance(&mut Plain(&mut self.text), data);
    }

    /// Offset of the first match of `pattern` inside the tail window.
    pub(crate) fn find_in_tail(&self, pattern: &Regex) -> Option<usize> {
        let from = self.text.len().saturating_sub(self.window);
        pattern.find(&self.text[from..]).map(|m| from + m.start())
    }

    /// Hand out everything collected so far.
    pub(crate) fn drain(&mut self) -> Vec<u8> {
        self.text.split().to_vec()
    }

    pub(crate) fn reset(&mut self) {
        self.text.clear();
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl Default for ShellBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Strip the command echo from the start and the prompt line from the end.
pub(crate) fn normalize_output(raw: &[u8], command: &str) -> String {
    let mut body = raw;

    // Drop the echoed command line.
    if let Some(rest) = body.strip_prefix(command.as_bytes()) {
        body = rest;
    }
    while let Some(rest) = body.strip_prefix(b"\n") {
        body = rest;
    }

    // Drop the trailing prompt line.
    let body = match memrchr(b'\n', body) {
        Some(pos) => &body[..pos],
        None => &[][..],
    };

    String::from_utf8_lossy(body).trim_end().to_string()
}
