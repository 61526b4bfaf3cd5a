//! Pipeline error types.

use std::fmt;
use std::io;

use thiserror::Error;

/// A stage that did not exit cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Name of the stage, e.g. `"fetch"` or `"transcode"`.
    pub stage: String,
    /// Exit code, `None` when the process was terminated by a signal
    /// or could not be waited on.
    pub code: Option<i32>,
    /// Tail of the stage's stderr output.
    pub diagnostics: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "stage `{}` exited with code {}", self.stage, code)?,
            None => write!(f, "stage `{}` was terminated", self.stage)?,
        }
        let diagnostics = self.diagnostics.trim();
        if !diagnostics.is_empty() {
            write!(f, ": {diagnostics}")?;
        }
        Ok(())
    }
}

/// Errors produced by [`Pipeline`](super::Pipeline).
///
/// The type is `Clone` because the result of closing a pipeline is cached
/// and handed to every caller of `close`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    NoStages,

    #[error("failed to start stage `{stage}`: {message}")]
    Start {
        stage: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("pipeline output closed")]
    Closed,

    #[error("{}", describe_failures(.0))]
    StageFailed(Vec<StageFailure>),

    #[error("pipeline supervisor terminated unexpectedly")]
    Aborted,
}

impl PipelineError {
    pub(crate) fn start(stage: &str, err: &io::Error) -> Self {
        Self::Start {
            stage: stage.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Stages that exited with a failure, empty for other variants.
    pub fn failures(&self) -> &[StageFailure] {
        match self {
            Self::StageFailed(failures) => failures,
            _ => &[],
        }
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Recover a pipeline error carried inside an `io::Error` returned by a read.
    pub fn from_io(err: &io::Error) -> Option<&PipelineError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<PipelineError>())
    }

    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self {
            Self::Closed => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

fn describe_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
