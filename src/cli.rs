use std::path::PathBuf;

use clap::Parser;

/// Repairs malformed unified-diff patches so they apply cleanly.
#[derive(Parser, Debug)]
#[command(name = "diffmend", version, about, long_about = None)]
pub struct Cli {
    /// Directory to change into before reading the patch from standard
    /// input, so relative paths in the patch resolve against it.
    pub directory: Option<PathBuf>,
}
