//! `diffmend` re-locates and repairs the hunk headers of a unified diff
//! against its live source tree, so patches with drifted line numbers,
//! over-long lead-in, missing trailing context, or whitespace-only noise
//! still apply cleanly.

pub mod anchor;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod header;
pub mod line_reader;
pub mod stanza;
