//! The header rewriter and offset tracker (§4.5): validates the stanza's
//! original `@@ ...` line, formats the corrected replacement, and replays
//! the stanza buffer to stdout, substituting any recorded rewrites.

use std::io::Write;

use crate::errors::{RepairError, Result};
use crate::stanza::Stanza;

/// Running, process-wide line-offset state: the cumulative effect of every
/// repaired stanza's `post - pre` delta on subsequent anchors, and the
/// count of headers that needed correcting.
#[derive(Default)]
pub struct OffsetTracker {
    pub delta: i64,
    pub bad: usize,
    pub stanzas: usize,
}

impl OffsetTracker {
    pub fn record(&mut self, pre: usize, post: usize) {
        self.delta += post as i64 - pre as i64;
    }
}

/// Validates that `header` looks like `@@ -...` and is long enough to carry
/// real content, per the original format check.
fn validate_header(header: &[u8]) -> Result<()> {
    if header.len() < 8 || &header[0..4] != b"@@ -" {
        return Err(RepairError::HeaderFormat);
    }
    Ok(())
}

/// Formats the corrected header line for a stanza anchored at `anchor`,
/// given the process's running `delta`.
pub fn format_header(anchor: usize, delta: i64, pre: usize, post: usize) -> Vec<u8> {
    let new_anchor = anchor as i64 + delta;
    format!("@@ -{},{} +{},{} @@\n", anchor, pre, new_anchor, post).into_bytes()
}

/// Writes the corrected header and the repaired stanza body to `out`,
/// applying any whitespace-collapse rewrites recorded by the anchor
/// locator, and updates `tracker`'s running delta. Returns whether the
/// original header needed correction (for the bad-stanza diagnostic).
pub fn emit(
    out: &mut impl Write,
    stanza: &Stanza,
    anchor: usize,
    tracker: &mut OffsetTracker,
) -> Result<bool> {
    validate_header(&stanza.original_header)?;

    let new_header = format_header(anchor, tracker.delta, stanza.pre, stanza.post);
    let changed = new_header != stanza.original_header;
    if changed {
        eprintln!(
            "  - (lead_in {}, lead_out {}) {}",
            stanza.lead_in,
            stanza.cx_active,
            String::from_utf8_lossy(&new_header)
        );
    }

    out.write_all(&new_header)
        .map_err(|e| RepairError::io("failed to write stanza header to stdout", e))?;

    let mut cursor = stanza.buffer.cursor_from(stanza.effective_start)?;
    let mut buf = Vec::new();
    let mut index = 0usize;
    loop {
        let n = cursor
            .next_line(&mut buf)
            .map_err(|e| RepairError::io("failed to replay stanza body", e))?;
        if n == 0 {
            break;
        }
        let line: &[u8] = stanza.rewrite_for(index).unwrap_or(&buf);
        out.write_all(line)
            .map_err(|e| RepairError::io("failed to write to stdout", e))?;
        index += 1;
    }

    tracker.record(stanza.pre, stanza.post);
    tracker.stanzas += 1;
    if changed {
        tracker.bad += 1;
    }

    Ok(changed)
}
