//! Error taxonomy for sorter orchestration
//!
//! Configuration and installation errors always abort: the call cannot
//! possibly succeed. Execution and result-load errors have a recoverable
//! mode, controlled per call by `raise_on_error`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SorterError>;

/// Broad error kind, recorded on failed jobs and in run logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Installation,
    Execution,
    ResultLoad,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Installation => "installation",
            ErrorKind::Execution => "execution",
            ErrorKind::ResultLoad => "result_load",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Sorter orchestration error types.
#[derive(Debug, Error)]
pub enum SorterError {
    /// Bad caller input: unknown grouping key, unknown parameter,
    /// incompatible concurrency backend.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Adapter or external tool not present, or unwritable output path.
    #[error("Installation error: {0}")]
    Installation(String),

    /// The external sorting process failed.
    #[error("Spike sorting failed: {message}. You can inspect the runtime trace in {log_path}")]
    Execution { message: String, log_path: String },

    /// Result files missing or unparseable.
    #[error("Result load error: {0}")]
    ResultLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SorterError {
    pub fn execution(message: impl Into<String>, log_path: &std::path::Path) -> Self {
        SorterError::Execution {
            message: message.into(),
            log_path: log_path.display().to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SorterError::Configuration(_) => ErrorKind::Configuration,
            SorterError::Installation(_) => ErrorKind::Installation,
            SorterError::Execution { .. } => ErrorKind::Execution,
            SorterError::ResultLoad(_) => ErrorKind::ResultLoad,
            SorterError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<spikerun_shared_types::RecordingError> for SorterError {
    fn from(err: spikerun_shared_types::RecordingError) -> Self {
        match err {
            spikerun_shared_types::RecordingError::Io(e) => SorterError::Io(e),
            other => SorterError::Configuration(other.to_string()),
        }
    }
}

/// Map a directory-creation failure onto the installation kind.
pub fn unwritable(path: &std::path::Path, err: &std::io::Error) -> SorterError {
    SorterError::Installation(format!(
        "output folder {} is not writable: {}",
        path.display(),
        err
    ))
}
