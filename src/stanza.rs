//! The stanza buffer and stanza record (data model, §3).
//!
//! The body lines of the hunk currently being processed are written
//! verbatim to a scratch file as they arrive, so the hunk can be replayed
//! once its header has been rewritten. Using a real file (rather than an
//! in-memory `Vec`) keeps stanza size unbounded, matching the behaviour of
//! the tool this one replaces; a fresh handle is opened by path for every
//! independent read cursor rather than sharing one seekable handle, which
//! sidesteps the surprising way duplicated file descriptors share a single
//! offset on Unix.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{RepairError, Result};
use crate::line_reader::LineReader;

/// Consecutive lead-in context beyond this many lines is discarded by the
/// anchor locator (§4.4, step 1; named per the Design Notes in §9).
pub const LEAD_IN_THRESHOLD: usize = 3;

/// Minimum desired trailing context; the locator pads up to this many
/// lines from the source at end-of-file (§4.4, step 4).
pub const TRAILING_CONTEXT_TARGET: usize = 3;

/// Largest prefix of the original header line retained for diagnostics.
const MAX_HEADER_BYTES: usize = 128;

/// A file-backed scratch buffer holding one stanza's body lines verbatim.
pub struct StanzaBuffer {
    path: PathBuf,
    end: u64,
}

impl StanzaBuffer {
    /// Creates (truncating if present) a new backing file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| RepairError::io(format!("Unable to create temp file {:?}", path), e))?;
        Ok(StanzaBuffer { path, end: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the buffer in bytes.
    pub fn len(&self) -> u64 {
        self.end
    }

    /// Appends `bytes` at the current end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RepairError::io("Unable to append to temp file", e))?;
        f.write_all(bytes)
            .map_err(|e| RepairError::io("Unable to append to temp file", e))?;
        self.end += bytes.len() as u64;
        Ok(())
    }

    /// Opens an independent, freshly-seeked read cursor at `offset`.
    pub fn cursor_from(&self, offset: u64) -> Result<LineReader<File>> {
        let f = File::open(&self.path)
            .map_err(|e| RepairError::io("Unable to reopen temp file", e))?;
        let mut reader = LineReader::new(f, self.path.to_string_lossy().into_owned());
        reader
            .seek(offset)
            .map_err(|e| RepairError::io("Unable to seek temp file", e))?;
        Ok(reader)
    }

    /// Removes the backing file. Safe to call more than once.
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A recorded per-line replacement, triggered when whitespace-only
/// divergence allowed a stanza line to match the source (§3, §4.4).
///
/// Modelled as a flat list rather than a literal linked list — an
/// association list is the idiomatic Rust equivalent the Design Notes (§9)
/// call out as equally valid, and lookup remains the same O(N·R).
pub type RewriteList = Vec<(usize, Vec<u8>)>;

/// The mutable state of the stanza currently being parsed or repaired.
pub struct Stanza {
    pub buffer: StanzaBuffer,
    /// Byte offset into `buffer` at which the body's *effective* start
    /// lies; advanced past discarded excess lead-in.
    pub effective_start: u64,
    /// Original `@@ ...` header line, bounded to `MAX_HEADER_BYTES`.
    pub original_header: Vec<u8>,
    pub pre: usize,
    pub post: usize,
    pub lead_in: usize,
    pub lead_in_active: bool,
    /// Length of the context run currently active at the tail.
    pub cx_active: usize,
    pub lead_in_corrected: usize,
    pub rewrites: RewriteList,
}

impl Stanza {
    pub fn start(buffer: StanzaBuffer, header_line: &[u8]) -> Self {
        let mut original_header = header_line.to_vec();
        original_header.truncate(MAX_HEADER_BYTES);
        Stanza {
            buffer,
            effective_start: 0,
            original_header,
            pre: 0,
            post: 0,
            lead_in: 0,
            lead_in_active: true,
            cx_active: 0,
            lead_in_corrected: 0,
            rewrites: Vec::new(),
        }
    }

    /// Appends a body line, updating the running counters per the state
    /// machine's transition table (§4.2).
    pub fn push_context(&mut self, line: &[u8]) -> Result<()> {
        self.buffer.append(line)?;
        self.pre += 1;
        self.post += 1;
        if self.lead_in_active {
            self.lead_in += 1;
        }
        self.cx_active += 1;
        Ok(())
    }

    pub fn push_minus(&mut self, line: &[u8]) -> Result<()> {
        self.buffer.append(line)?;
        self.pre += 1;
        self.lead_in_active = false;
        self.cx_active = 0;
        Ok(())
    }

    pub fn push_plus(&mut self, line: &[u8]) -> Result<()> {
        self.buffer.append(line)?;
        self.post += 1;
        self.lead_in_active = false;
        self.cx_active = 0;
        Ok(())
    }

    pub fn rewrite_for(&self, index: usize) -> Option<&[u8]> {
        self.rewrites
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

/// Classifies a body line's terminator and returns the bytes preceding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    None,
    Lf,
    CrLf,
}

pub fn split_eol(line: &[u8]) -> (Eol, &[u8]) {
    if line.len() >= 2 && line[line.len() - 2] == b'\r' && line[line.len() - 1] == b'\n' {
        (Eol::CrLf, &line[..line.len() - 2])
    } else if line.last() == Some(&b'\n') {
        (Eol::Lf, &line[..line.len() - 1])
    } else {
        (Eol::None, line)
    }
}
