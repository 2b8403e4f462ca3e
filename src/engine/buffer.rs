use crate::source::{LineEnd, LineSource};
use std::io;

/// Smallest buffer the engine hands out; growth doubles from here.
pub const MIN_BUF: usize = 64 * 1024;

/// One logical line of one side. Reads past the stored bytes yield NUL,
/// so cursors may sit one past the end without special-casing.
#[derive(Debug, Clone, Default)]
pub struct LineBuf {
    bytes: Vec<u8>,
}

impl LineBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            bytes: text.as_bytes().to_vec(),
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn set_text(&mut self, text: &str) {
        self.bytes.clear();
        self.bytes.extend_from_slice(text.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn byte(&self, at: usize) -> u8 {
        self.bytes.get(at).copied().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes from `from` to the end; positions past the end give an empty
    /// slice.
    pub fn tail(&self, from: usize) -> &[u8] {
        &self.bytes[from.min(self.bytes.len())..]
    }

    /// Short excerpt for diagnostics, at most 25 bytes.
    pub fn snippet(&self, from: usize) -> String {
        let tail = self.tail(from);
        String::from_utf8_lossy(&tail[..tail.len().min(25)]).into_owned()
    }

    /// Replace the content with the next line of `source`, doubling the
    /// buffer whenever a chunk fills up mid-line.
    pub fn fill_from(&mut self, source: &mut dyn LineSource) -> io::Result<LineEnd> {
        self.bytes.clear();
        loop {
            let filled = self.bytes.len();
            let target = self.bytes.capacity().max(MIN_BUF);
            self.bytes.resize(target, 0);

            let (end, written) = source.read_chunk(&mut self.bytes[filled..])?;
            self.bytes.truncate(filled + written);

            match end {
                LineEnd::Filled => {
                    let capacity = self.bytes.capacity();
                    self.bytes.reserve(capacity);
                }
                LineEnd::Newline | LineEnd::Eof => return Ok(end),
            }
        }
    }
}

/// Per-side byte cursors into the current line pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairCursor {
    pub lhs: usize,
    pub rhs: usize,
}
