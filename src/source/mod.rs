//! Line sources feeding the engine, one per compared side.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::Path;

/// How a chunked read ended: the line terminator was consumed, the source
/// is exhausted, or the chunk filled up mid-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnd {
    Newline,
    Eof,
    Filled,
}

pub trait LineSource {
    /// Fill `out` with bytes of the current line, stopping at the chunk
    /// boundary or after consuming (without storing) a newline. Returns
    /// how the read ended and the number of bytes written.
    fn read_chunk(&mut self, out: &mut [u8]) -> io::Result<(LineEnd, usize)>;

    /// Discard the remainder of the current line including its terminator.
    fn skip_line(&mut self) -> io::Result<LineEnd>;

    /// Consume ASCII whitespace, newlines included.
    fn skip_space(&mut self) -> io::Result<()>;

    /// True once a read has observed the end of the source.
    fn at_eof(&self) -> bool;
}

/// Byte-line reader over any buffered input.
pub struct ByteLines<R> {
    inner: R,
    eof: bool,
}

impl<R: BufRead> ByteLines<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, eof: false }
    }
}

impl ByteLines<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl ByteLines<Cursor<Vec<u8>>> {
    pub fn from_text(text: &str) -> Self {
        Self::new(Cursor::new(text.as_bytes().to_vec()))
    }
}

impl<R: BufRead> LineSource for ByteLines<R> {
    fn read_chunk(&mut self, out: &mut [u8]) -> io::Result<(LineEnd, usize)> {
        let mut written = 0;

        loop {
            if written == out.len() {
                return Ok((LineEnd::Filled, written));
            }

            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                self.eof = true;
                return Ok((LineEnd::Eof, written));
            }

            let room = out.len() - written;
            let take = available.len().min(room);
            match available[..take].iter().position(|&byte| byte == b'\n') {
                Some(newline) => {
                    out[written..written + newline].copy_from_slice(&available[..newline]);
                    written += newline;
                    self.inner.consume(newline + 1);
                    return Ok((LineEnd::Newline, written));
                }
                None => {
                    out[written..written + take].copy_from_slice(&available[..take]);
                    written += take;
                    self.inner.consume(take);
                }
            }
        }
    }

    fn skip_line(&mut self) -> io::Result<LineEnd> {
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                self.eof = true;
                return Ok(LineEnd::Eof);
            }
            match available.iter().position(|&byte| byte == b'\n') {
                Some(newline) => {
                    self.inner.consume(newline + 1);
                    return Ok(LineEnd::Newline);
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                }
            }
        }
    }

    fn skip_space(&mut self) -> io::Result<()> {
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                self.eof = true;
                return Ok(());
            }
            match available.iter().position(|byte| !byte.is_ascii_whitespace()) {
                Some(0) => return Ok(()),
                Some(end) => self.inner.consume(end),
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                }
            }
        }
    }

    fn at_eof(&self) -> bool {
        self.eof
    }
}
