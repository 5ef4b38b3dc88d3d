//! The anchor locator (§4.4): re-locates a buffered stanza against the live
//! source file by tolerant context-matching, trims excess lead-in, and pads
//! missing trailing context at end-of-file.

use std::fs::File;
use std::path::Path;

use crate::errors::{RepairError, Result};
use crate::line_reader::LineReader;
use crate::stanza::{split_eol, Eol, Stanza, LEAD_IN_THRESHOLD, TRAILING_CONTEXT_TARGET};

/// Outcome of comparing one stanza line (leading marker plus content)
/// against one source line, under the tolerant comparison rules.
enum Compare {
    Equal,
    /// Whitespace-only divergence tolerated; carries the replacement bytes
    /// (marker + source content + `\n`) to record as a rewrite.
    Rewrite(Vec<u8>),
    Mismatch,
}

fn tolerant_compare(stanza_line: &[u8], src_line: &[u8]) -> Compare {
    debug_assert!(stanza_line.first() == Some(&b' ') || stanza_line.first() == Some(&b'-'));
    let marker = stanza_line[0];
    let (s_eol, s_content) = split_eol(&stanza_line[1..]);
    let (src_eol, src_content) = split_eol(src_line);

    if (s_eol == Eol::None) != (src_eol == Eol::None) {
        return Compare::Mismatch;
    }
    if s_content == src_content {
        return Compare::Equal;
    }
    if whitespace_collapse_eq(s_content, src_content) {
        let mut replacement = Vec::with_capacity(src_content.len() + 2);
        replacement.push(marker);
        replacement.extend_from_slice(src_content);
        replacement.push(b'\n');
        return Compare::Rewrite(replacement);
    }
    Compare::Mismatch
}

/// A maximal run of bytes, either a whitespace run (collapsed to a single
/// token regardless of length) or a maximal non-whitespace run.
#[derive(PartialEq, Eq)]
enum Tok<'a> {
    Ws,
    Text(&'a [u8]),
}

fn is_ws(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn tokenize(s: &[u8]) -> Vec<Tok<'_>> {
    let mut toks = Vec::new();
    let mut i = 0;
    while i < s.len() {
        let start = i;
        if is_ws(s[i]) {
            while i < s.len() && is_ws(s[i]) {
                i += 1;
            }
            toks.push(Tok::Ws);
        } else {
            while i < s.len() && !is_ws(s[i]) {
                i += 1;
            }
            toks.push(Tok::Text(&s[start..i]));
        }
    }
    toks
}

/// Both sides must agree on the presence/absence of whitespace at each
/// token boundary and on every non-whitespace byte (§4.4). Tokenizing both
/// sides and comparing token sequences expresses this directly, without
/// the source tool's unparenthesised `||`/`&&` precedence bug (§9).
fn whitespace_collapse_eq(a: &[u8], b: &[u8]) -> bool {
    tokenize(a) == tokenize(b)
}

/// Longest-run diagnostics recorded across failed candidates, reported if
/// the stanza cannot be located anywhere in the source (§4.4, step 3).
#[derive(Default)]
struct Diagnostics {
    best_run: usize,
    last_matched: Option<(Vec<u8>, Vec<u8>)>,
    diverging: Option<(Vec<u8>, Vec<u8>)>,
}

impl Diagnostics {
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some((stanza_line, src_line)) = &self.last_matched {
            out.push_str(&format!(
                "  last matched:   stanza={:?} source={:?}\n",
                render_tabs(stanza_line),
                render_tabs(src_line)
            ));
        }
        if let Some((stanza_line, src_line)) = &self.diverging {
            out.push_str(&format!(
                "  first diverges: stanza={:?} source={:?}\n",
                render_tabs(stanza_line),
                render_tabs(src_line)
            ));
        }
        out
    }
}

fn render_tabs(line: &[u8]) -> String {
    String::from_utf8_lossy(line).replace('\t', ">")
}

/// Result of one successful candidate match: the rewrites collected during
/// the walk and the absolute byte offset in the source just past the last
/// consumed source line (used for EOF trailing-context repair).
struct MatchOutcome {
    rewrites: Vec<(usize, Vec<u8>)>,
    match_end_offset: u64,
}

/// Attempts to match the stanza's non-added lines against the source
/// starting at `candidate_offset`. Returns `None` on mismatch or source
/// exhaustion before the stanza is consumed.
fn try_candidate(
    stanza: &Stanza,
    source_path: &Path,
    candidate_offset: u64,
    diag: &mut Diagnostics,
) -> Result<Option<MatchOutcome>> {
    let mut src = open_source_cursor(source_path, candidate_offset)?;
    let mut stanza_cursor = stanza.buffer.cursor_from(stanza.effective_start)?;

    let mut rewrites = Vec::new();
    let mut idx = 0usize;
    let mut run = 0usize;
    let mut src_buf = Vec::new();
    let mut stanza_buf = Vec::new();
    let mut last_matched_pair: Option<(Vec<u8>, Vec<u8>)> = None;

    loop {
        // Fetch the next stanza line that is not `+`-prefixed; `+` lines
        // are skipped without consuming a source line. Checking for stanza
        // exhaustion *before* reading another source line (rather than
        // after, as a literal reading of the line-by-line scan would do)
        // matters at true end-of-file: a stanza whose last real content
        // lands on the source's last line must still be able to report a
        // match with zero lines left to read.
        let stanza_index = loop {
            let n = stanza_cursor
                .next_line(&mut stanza_buf)
                .map_err(|e| RepairError::io("Unable to read stanza buffer", e))?;
            if n == 0 {
                // Stanza exhausted before a mismatch: the candidate matches.
                return Ok(Some(MatchOutcome {
                    rewrites,
                    match_end_offset: src.pos(),
                }));
            }
            let this_idx = idx;
            idx += 1;
            if stanza_buf.first() == Some(&b'+') {
                continue;
            }
            break this_idx;
        };

        let n_src = src
            .next_line(&mut src_buf)
            .map_err(|e| RepairError::io("Unable to read source", e))?;
        if n_src == 0 {
            return Ok(None);
        }

        match tolerant_compare(&stanza_buf, &src_buf) {
            Compare::Equal => {
                run += 1;
                last_matched_pair = Some((stanza_buf.clone(), src_buf.clone()));
            }
            Compare::Rewrite(replacement) => {
                rewrites.push((stanza_index, replacement));
                run += 1;
                last_matched_pair = Some((stanza_buf.clone(), src_buf.clone()));
            }
            Compare::Mismatch => {
                if run > diag.best_run {
                    diag.best_run = run;
                    diag.last_matched = last_matched_pair.clone();
                    diag.diverging = Some((stanza_buf.clone(), src_buf.clone()));
                }
                return Ok(None);
            }
        }
    }
}

fn open_source_cursor(source_path: &Path, offset: u64) -> Result<LineReader<File>> {
    let f = File::open(source_path).map_err(|e| {
        RepairError::io(format!("Unable to open: {}", source_path.display()), e)
    })?;
    let mut reader = LineReader::new(f, source_path.to_string_lossy().into_owned());
    reader
        .seek(offset)
        .map_err(|e| RepairError::io("Unable to seek source", e))?;
    Ok(reader)
}

/// Finds the 1-based source line at which `stanza`'s non-added content
/// matches, trimming excess lead-in first and padding trailing context
/// from the source afterwards. On success, mutates `stanza` in place
/// (effective_start, pre/post/cx_active, rewrites) and returns the anchor.
pub fn find_anchor(stanza: &mut Stanza, source_path: &Path, stanza_no: usize) -> Result<usize> {
    while stanza.lead_in > LEAD_IN_THRESHOLD {
        let mut cursor = stanza.buffer.cursor_from(stanza.effective_start)?;
        let mut buf = Vec::new();
        let n = cursor
            .next_line(&mut buf)
            .map_err(|e| RepairError::io("Unable to skip lead-in", e))?;
        if n == 0 {
            return Err(RepairError::Parse("Unable to skip temp lines".into()));
        }
        stanza.effective_start += n as u64;
        stanza.lead_in -= 1;
        stanza.lead_in_corrected += 1;
        stanza.pre -= 1;
        stanza.post -= 1;
        eprintln!("Stanza {}: removing extra lead-in", stanza_no);
    }

    let mut diag = Diagnostics::default();
    let mut candidate_offset = 0u64;
    let mut candidate_line_no = 1usize;

    let outcome = loop {
        if let Some(outcome) = try_candidate(stanza, source_path, candidate_offset, &mut diag)? {
            break outcome;
        }
        let mut advance = open_source_cursor(source_path, candidate_offset)?;
        let mut buf = Vec::new();
        let n = advance
            .next_line(&mut buf)
            .map_err(|e| RepairError::io("Unable to read source", e))?;
        if n == 0 {
            eprintln!("{}", diag.render());
            return Err(RepairError::Anchor);
        }
        candidate_offset += n as u64;
        candidate_line_no += 1;
    };

    stanza.rewrites = outcome.rewrites;

    if stanza.cx_active < TRAILING_CONTEXT_TARGET {
        let mut added = 0usize;
        let mut tail = open_source_cursor(source_path, outcome.match_end_offset)?;
        let mut buf = Vec::new();
        while stanza.cx_active < TRAILING_CONTEXT_TARGET {
            let n = tail
                .next_line(&mut buf)
                .map_err(|e| RepairError::io("Unable to read source for EOF padding", e))?;
            if n == 0 {
                break;
            }
            let (_, content) = split_eol(&buf);
            let mut line = Vec::with_capacity(content.len() + 2);
            line.push(b' ');
            line.extend_from_slice(content);
            line.push(b'\n');
            stanza.buffer.append(&line)?;
            stanza.pre += 1;
            stanza.post += 1;
            stanza.cx_active += 1;
            added += 1;
        }
        if added > 0 {
            eprintln!(
                "Stanza {}: detected patch at EOF: added {} context at end",
                stanza_no, added
            );
        }
    }

    Ok(candidate_line_no)
}
