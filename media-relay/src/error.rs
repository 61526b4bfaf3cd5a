//! Application-wide error types.

use std::path::{Path, PathBuf};

use process_utils::PipelineError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// An external tool could not be launched (missing or not executable).
    #[error("Failed to start {stage}: {message}")]
    ToolStart { stage: String, message: String },

    /// An external tool exited with a non-zero status.
    #[error("Tool failed: {0}")]
    ToolRuntime(PipelineError),

    /// Tool output could not be interpreted (bad metadata, missing output file).
    #[error("Failed to parse tool output: {0}")]
    OutputParse(String),

    #[error("No suitable format found for {0}")]
    NoSuitableFormat(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// The origin failed after the response to the client had started.
    #[error("Upstream error: {0}")]
    ProxyUpstream(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn output_parse(msg: impl Into<String>) -> Self {
        Self::OutputParse(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the failure was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => Self::Cancelled,
            PipelineError::Start { stage, message, .. } => Self::ToolStart { stage, message },
            PipelineError::NoStages => Self::Other(err.to_string()),
            other => Self::ToolRuntime(other),
        }
    }
}
