//! The stream state machine (§4.2): drives the stanza buffer, the anchor
//! locator, and the header rewriter across a single pass over the input
//! patch, writing the repaired patch to standard output as it goes.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::anchor::find_anchor;
use crate::errors::{FatalError, RepairError, Result};
use crate::header::{self, OffsetTracker};
use crate::line_reader::LineReader;
use crate::stanza::{Stanza, StanzaBuffer};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    AwaitMinusMinus,
    MustPlusPlus,
    MustAtAt,
    InBody,
}

/// Drives the repair engine over one patch stream. Owns the running delta
/// and bad-header count, the currently active stanza (if any), and the
/// single reused temp file backing every stanza in turn.
pub struct Engine {
    state: State,
    target_path: Option<String>,
    stanza: Option<Stanza>,
    tracker: OffsetTracker,
    temp_path: PathBuf,
    /// Directory target paths are resolved against. `None` means the
    /// process's current directory, which is what the `directory`
    /// positional argument (§6) ultimately controls by chdir'ing before
    /// the engine ever runs.
    base_dir: Option<PathBuf>,
}

impl Engine {
    /// `temp_path` is the single scratch file reused (truncated) across
    /// every stanza in the run, matching §4.3's create/truncate contract.
    pub fn new(temp_path: impl Into<PathBuf>) -> Self {
        Engine {
            state: State::AwaitMinusMinus,
            target_path: None,
            stanza: None,
            tracker: OffsetTracker::default(),
            temp_path: temp_path.into(),
            base_dir: None,
        }
    }

    /// Resolves target file paths against `base_dir` instead of the
    /// process's current directory. Used by tests so that concurrently
    /// running cases never need to mutate shared process-wide state.
    pub fn with_base_dir(temp_path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Engine {
            base_dir: Some(base_dir.into()),
            ..Engine::new(temp_path)
        }
    }

    pub fn bad_count(&self) -> usize {
        self.tracker.bad
    }

    pub fn stanza_count(&self) -> usize {
        self.tracker.stanzas
    }

    /// Consumes `reader` line by line until end-of-input, writing the
    /// repaired patch to `out`. On any fatal condition, the active
    /// stanza's temp file is removed and a [`FatalError`] describing the
    /// offending line is returned.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut LineReader<R>,
        out: &mut impl Write,
    ) -> std::result::Result<(), FatalError> {
        let mut line = Vec::new();
        loop {
            let n = match reader.next_line(&mut line) {
                Ok(n) => n,
                Err(e) => {
                    let err = RepairError::io("Unable to read input", e);
                    return Err(self.fatal(reader.line_no(), &line, err));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = self.process_line(&line, out) {
                return Err(self.fatal(reader.line_no(), &line, e));
            }
        }
        if self.stanza.is_some() {
            if let Err(e) = self.finish_stanza(out) {
                return Err(self.fatal(reader.line_no(), &line, e));
            }
        }
        Ok(())
    }

    fn fatal(&mut self, line_no: usize, last_line: &[u8], source: RepairError) -> FatalError {
        self.stanza.take();
        // `finish_stanza` may already have taken the stanza out of
        // `self.stanza` by the time a fallible step inside it errors (e.g.
        // `find_anchor` or `header::emit`), so cleanup can't key off
        // `self.stanza`'s presence. The backing file is always at the
        // engine's own fixed `temp_path`, truncated fresh per stanza, so
        // removing it unconditionally here is correct and idempotent.
        let _ = std::fs::remove_file(&self.temp_path);
        FatalError {
            line_no,
            last_line: String::from_utf8_lossy(last_line).into_owned(),
            source,
        }
    }

    fn process_line(&mut self, line: &[u8], out: &mut impl Write) -> Result<()> {
        match self.state {
            State::AwaitMinusMinus => {
                if starts_with(line, b"--- ") {
                    self.write_passthrough(line, out)?;
                    self.state = State::MustPlusPlus;
                    Ok(())
                } else {
                    self.write_passthrough(line, out)
                }
            }
            State::MustPlusPlus => {
                if starts_with(line, b"+++ ") {
                    self.target_path = Some(strip_path_component(line));
                    self.write_passthrough(line, out)?;
                    self.state = State::MustAtAt;
                    Ok(())
                } else {
                    Err(RepairError::Parse("+++ required but not found".into()))
                }
            }
            State::MustAtAt => {
                if starts_with(line, b"@@ ") {
                    self.stanza_start(line)?;
                    self.state = State::InBody;
                    Ok(())
                } else {
                    Err(RepairError::Parse("@@ required but missing".into()))
                }
            }
            State::InBody => self.process_body_line(line, out),
        }
    }

    fn process_body_line(&mut self, line: &[u8], out: &mut impl Write) -> Result<()> {
        if line == b"\n" {
            // Tolerated stray blank line near the end of input; skip.
            return Ok(());
        }
        match line.first() {
            Some(b' ') => {
                self.active_stanza()?.push_context(line)?;
                Ok(())
            }
            Some(b'-') if starts_with(line, b"--- ") => {
                // A new file section arrived without a preceding `diff `
                // line. The state transition happens before the current
                // stanza is finalised — surprising, but observable
                // behaviour worth preserving exactly.
                self.state = State::MustPlusPlus;
                self.finish_stanza(out)?;
                Ok(())
            }
            Some(b'-') => {
                self.active_stanza()?.push_minus(line)?;
                Ok(())
            }
            Some(b'+') => {
                let line = collapse_whitespace_only_plus(line);
                if let Some(line) = line {
                    self.active_stanza()?.push_plus(&line)?;
                }
                Ok(())
            }
            _ if starts_with(line, b"diff ") => {
                self.finish_stanza(out)?;
                self.write_passthrough(line, out)?;
                self.state = State::AwaitMinusMinus;
                Ok(())
            }
            _ if starts_with(line, b"@@ ") => {
                self.finish_stanza(out)?;
                self.stanza_start(line)?;
                Ok(())
            }
            _ => Err(RepairError::Parse("unexpected character in stanza".into())),
        }
    }

    fn active_stanza(&mut self) -> Result<&mut Stanza> {
        self.stanza
            .as_mut()
            .ok_or_else(|| RepairError::Parse("no active stanza".into()))
    }

    fn stanza_start(&mut self, header_line: &[u8]) -> Result<()> {
        let buffer = StanzaBuffer::create(&self.temp_path)?;
        self.stanza = Some(Stanza::start(buffer, header_line));
        Ok(())
    }

    fn finish_stanza(&mut self, out: &mut impl Write) -> Result<()> {
        let mut stanza = match self.stanza.take() {
            Some(s) => s,
            None => return Ok(()),
        };
        let source_path = self.source_path()?;
        let anchor = find_anchor(&mut stanza, &source_path, self.tracker.stanzas + 1)?;
        header::emit(out, &stanza, anchor, &mut self.tracker)?;
        stanza.buffer.remove();
        Ok(())
    }

    fn source_path(&self) -> Result<PathBuf> {
        let target = self
            .target_path
            .as_ref()
            .ok_or_else(|| RepairError::Parse("no target file path recorded".into()))?;
        Ok(match &self.base_dir {
            Some(base) => base.join(target),
            None => PathBuf::from(target),
        })
    }

    fn write_passthrough(&self, line: &[u8], out: &mut impl Write) -> Result<()> {
        out.write_all(line)
            .map_err(|e| RepairError::io("failed to write to stdout", e))
    }
}

fn starts_with(line: &[u8], prefix: &[u8]) -> bool {
    line.len() >= prefix.len() && &line[..prefix.len()] == prefix
}

/// Strips the first path component (`a/foo/bar.rs` → `foo/bar.rs`) from a
/// `+++ ` or `--- ` file-header line's path field.
fn strip_path_component(line: &[u8]) -> String {
    let rest = &line[4..];
    let rest = rest.strip_suffix(b"\r\n").or_else(|| rest.strip_suffix(b"\n")).unwrap_or(rest);
    let path = match rest.iter().position(|&b| b == b'/') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    String::from_utf8_lossy(path).into_owned()
}

/// If `line` (a `+`-prefixed body line) is whitespace-only, replaces its
/// payload with just the detected terminator, or drops the line entirely
/// if no terminator is present (§4.5).
fn collapse_whitespace_only_plus(line: &[u8]) -> Option<Vec<u8>> {
    let payload = &line[1..];
    let (content, terminator): (&[u8], &[u8]) = if let Some(c) = payload.strip_suffix(b"\r\n") {
        (c, b"\r\n")
    } else if let Some(c) = payload.strip_suffix(b"\n") {
        (c, b"\n")
    } else {
        (payload, b"")
    };
    if !content.iter().all(|&b| b == b' ' || b == b'\t') {
        return Some(line.to_vec());
    }
    if terminator.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(1 + terminator.len());
    out.push(b'+');
    out.extend_from_slice(terminator);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;

    fn run_patch(source: &str, patch: &str) -> (String, Engine) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), source).unwrap();
        let full_patch = patch.replace("{F}", "file.txt");
        let mut engine = Engine::with_base_dir(dir.path().join(".diffmend-test"), dir.path());
        let mut reader = LineReader::new(Cursor::new(full_patch.into_bytes()), "stdin");
        let mut out = Vec::new();
        let result = engine.run(&mut reader, &mut out);
        result.unwrap();
        (String::from_utf8(out).unwrap(), engine)
    }

    #[test]
    fn strips_first_path_component() {
        assert_eq!(strip_path_component(b"+++ a/src/main.rs\n"), "src/main.rs");
        assert_eq!(strip_path_component(b"+++ lonely\n"), "lonely");
    }

    #[test]
    fn collapses_whitespace_only_added_line() {
        assert_eq!(collapse_whitespace_only_plus(b"+   \n"), Some(b"+\n".to_vec()));
        assert_eq!(collapse_whitespace_only_plus(b"+content\n"), Some(b"+content\n".to_vec()));
        assert_eq!(collapse_whitespace_only_plus(b"+\t "), None);
    }

    #[test]
    fn repairs_simple_renumbered_header() {
        // Trailing context is padded out to 3 lines (B, C, D) so the EOF
        // trailing-context pass has nothing left to add, keeping this test
        // focused on header renumbering alone.
        let (output, engine) = run_patch(
            "A\nB\nC\nD\nE\n",
            "--- a/{F}\n+++ b/{F}\n@@ -99,3 +99,4 @@\n A\n+X\n B\n C\n D\n",
        );
        assert!(output.contains("@@ -1,4 +1,5 @@\n"));
        assert_eq!(engine.bad_count(), 1);
        assert_eq!(engine.stanza_count(), 1);
    }

    #[test]
    fn carries_cumulative_delta_across_stanzas() {
        let source: String = (1..=10).map(|n| format!("L{n}\n")).collect();
        // Each stanza carries 3 lines of trailing context so neither
        // triggers EOF padding, isolating the cumulative-delta behaviour.
        let patch = "--- a/{F}\n+++ b/{F}\n\
@@ -1,4 +1,6 @@\n L1\n+X\n+Y\n L2\n L3\n L4\n\
@@ -7,3 +7,3 @@\n L7\n L8\n L9\n";
        let (output, _engine) = run_patch(&source, patch);
        assert!(output.contains("@@ -7,3 +9,3 @@\n"));
    }

    #[test]
    fn rewrites_whitespace_only_divergent_line() {
        let (output, _engine) = run_patch(
            "\tfoo\nbar\nbaz\n",
            "--- a/{F}\n+++ b/{F}\n@@ -1,3 +1,3 @@\n  foo\n bar\n baz\n",
        );
        assert!(output.contains(" \tfoo\n"));
    }
}
