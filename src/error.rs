use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MdError {
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("failed to fetch {url}: {cause}")]
    Fetch { url: String, cause: FetchCause },

    #[error("malformed archive {}: {details}", path.display())]
    MalformedArchive { path: PathBuf, details: String },

    #[error("index {index} out of range for {len} records")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("dataset not found locally: {0}")]
    DatasetNotFound(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("simulation directory error: {0}")]
    SimulationDir(String),

    #[error("simulation failed: {0}")]
    Simulation(String),
}

impl MdError {
    pub fn malformed(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::MalformedArchive {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Fetch and parse failures; the pipeline may continue past these.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::MalformedArchive { .. })
    }
}

/// Why an archive download failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    Timeout,
    /// Name resolution or refused/reset connection.
    Connect(String),
    Transport(String),
    /// Non-2xx HTTP status.
    Status(u16),
}

impl FetchCause {
    pub fn is_transport(&self) -> bool {
        !matches!(self, FetchCause::Status(_))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FetchCause::Timeout => "timeout",
            FetchCause::Connect(_) => "connect",
            FetchCause::Transport(_) => "transport",
            FetchCause::Status(_) => "status",
        }
    }
}

impl fmt::Display for FetchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchCause::Timeout => write!(f, "request timed out"),
            FetchCause::Connect(message) => write!(f, "connection failed: {message}"),
            FetchCause::Transport(message) => write!(f, "transport error: {message}"),
            FetchCause::Status(status) => write!(f, "server returned status {status}"),
        }
    }
}
