use std::io;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use diffmend::cli::Cli;
use diffmend::engine::Engine;
use diffmend::line_reader::LineReader;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(directory) = &cli.directory {
        std::env::set_current_dir(directory)
            .with_context(|| format!("Unable to change directory to {}", directory.display()))?;
    }

    let temp_path = format!(".diffmend{}", process::id());
    let mut engine = Engine::new(&temp_path);
    let mut reader = LineReader::new(io::stdin().lock(), "<stdin>");
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match engine.run(&mut reader, &mut out) {
        Ok(()) => {
            eprintln!(
                "Completed: {} / {} stanza headers repaired",
                engine.bad_count(),
                engine.stanza_count()
            );
            Ok(())
        }
        Err(fatal) => {
            eprintln!("{}", fatal);
            process::exit(1);
        }
    }
}
