//! Errors raised by the reading producers.

use thiserror::Error;

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while producing readings.
///
/// None of these are fatal to the pipeline: they are converted into status
/// events or log entries at the boundary where they occur.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The transport could not be opened.
    #[error("connect failed for {port}: {reason}")]
    ConnectFailure { port: String, reason: String },

    /// The transport became unusable mid-session.
    #[error("read failed: {0}")]
    ReadFailure(#[from] std::io::Error),

    /// A line did not follow the `<thermal>,<light>` protocol.
    #[error("malformed line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    /// The operating system could not list serial ports.
    #[error("port enumeration failed: {0}")]
    PortEnumeration(String),

    /// Baud rate outside the supported set.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(String),

    /// The synthetic generator worker could not be spawned.
    #[error("generator failed to start: {0}")]
    GeneratorSpawn(String),
}

impl SourceError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        SourceError::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
