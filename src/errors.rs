use thiserror::Error;

/// The five fatal error categories from the repair engine's error taxonomy.
///
/// Every variant is fatal: there is no partial-success path. The engine
/// aborts the entire run as soon as one stanza cannot be repaired.
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("{0}")]
    Parse(String),

    #[error("Unable to find original stanza in source")]
    Anchor,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to record line rewrite")]
    Resource,

    #[error("Original stanza format problem")]
    HeaderFormat,
}

impl RepairError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RepairError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Wraps a [`RepairError`] with the input line number and the raw bytes of
/// the line being processed when the error was raised, so the driver can
/// produce the mandated `line <N>: fatal exit: <reason>: <last_input_line>`
/// diagnostic.
#[derive(Debug)]
pub struct FatalError {
    pub line_no: usize,
    pub last_line: String,
    pub source: RepairError,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: fatal exit: {}: {}",
            self.line_no,
            self.source,
            self.last_line.trim_end_matches('\n')
        )
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;
