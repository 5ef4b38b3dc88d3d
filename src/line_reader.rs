//! A buffered, byte-oriented line reader used for standard input, the live
//! source file, and the per-stanza side buffer alike.
//!
//! Unlike a typical `BufRead::read_line`, callers need to recover the
//! absolute byte offset at which the line they just received began, and to
//! seek back to an arbitrary offset later (the anchor locator opens several
//! independent cursors into the same file). [`LineReader`] exposes both.

use std::io::{self, Read, Seek, SeekFrom};

/// Size of the read-ahead buffer. Chosen to match the original tool's
/// stack-allocated line buffer; large enough that most diff/source lines
/// are satisfied by a single underlying `read`.
pub const BUFFER_SIZE: usize = 4096;

pub struct LineReader<R> {
    inner: R,
    buf: [u8; BUFFER_SIZE],
    /// Absolute offset of `buf[0]` in the underlying stream.
    buf_start: u64,
    /// Current read position within `buf`.
    pos: usize,
    /// Number of valid bytes currently in `buf`.
    len: usize,
    /// Absolute offset where the most recently returned line began.
    line_start: u64,
    /// 1-based index of the most recently returned line, for diagnostics.
    line_no: usize,
    name: String,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R, name: impl Into<String>) -> Self {
        LineReader {
            inner,
            buf: [0u8; BUFFER_SIZE],
            buf_start: 0,
            pos: 0,
            len: 0,
            line_start: 0,
            line_no: 0,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based index of the most recently returned line.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Absolute byte offset at which the most recently returned line began.
    pub fn begin_offset(&self) -> u64 {
        self.line_start
    }

    /// Absolute byte offset the next read will start from.
    pub fn pos(&self) -> u64 {
        self.buf_start + self.pos as u64
    }

    fn fill_buffer(&mut self) -> io::Result<usize> {
        self.buf_start += self.len as u64;
        let n = self.inner.read(&mut self.buf)?;
        self.len = n;
        self.pos = 0;
        Ok(n)
    }

    /// Reads the next line, inclusive of its terminator, into `out`
    /// (cleared first). Returns the number of bytes written, which is 0
    /// only at true end-of-file with no pending bytes. If the file ends
    /// without a trailing newline, a synthetic `\n` is appended.
    pub fn next_line(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        out.clear();
        self.line_start = self.buf_start + self.pos as u64;
        loop {
            if self.pos == self.len && self.fill_buffer()? == 0 {
                if !out.is_empty() {
                    out.push(b'\n');
                }
                break;
            }
            let byte = self.buf[self.pos];
            self.pos += 1;
            out.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        if !out.is_empty() {
            self.line_no += 1;
        }
        Ok(out.len())
    }
}

impl<R: Read + Seek> LineReader<R> {
    /// Seeks the underlying file to `offset`. The internal buffer is
    /// invalidated; the next `next_line` call performs a fresh read.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.buf_start = offset;
        self.pos = 0;
        self.len = 0;
        Ok(())
    }
}
