//! Error types for captive.

use std::io;

use thiserror::Error;

use crate::child::TerminationReason;

/// Main error type for captive.
///
/// Every variant is fatal for the pipeline run that raised it: there is no
/// retry and no partial-success mode.
#[derive(Error, Debug)]
pub enum CaptiveError {
    /// The wrapped program could not be executed.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A child process exited abnormally or with a non-zero status.
    #[error("child process {pid} {reason}")]
    ChildExit { pid: i32, reason: TerminationReason },

    /// The child stopped producing output while a unit still expected lines.
    #[error("sub-process stopped producing while expecting more output for unit {unit}")]
    UnderProduction { unit: u64 },

    /// The child produced output that no queued unit asked for.
    #[error("sub-process is producing more output than it was given input at unit {unit}")]
    OverProduction { unit: u64 },

    /// A unit descriptor could not be derived from malformed input.
    #[error("malformed input at unit {unit}: {message}")]
    Framing { unit: u64, message: String },

    /// The producing side went away without sending end-of-stream.
    #[error("unit queue closed before end-of-stream")]
    QueueClosed,

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

/// Result type alias for captive operations.
pub type Result<T> = std::result::Result<T, CaptiveError>;

impl CaptiveError {
    /// Create a framing error for the given 1-based unit number.
    pub fn framing(unit: u64, message: impl Into<String>) -> Self {
        Self::Framing {
            unit,
            message: message.into(),
        }
    }

    /// True when this is a write into a pipe whose reader has gone away.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == io::ErrorKind::BrokenPipe,
            Self::Sys(errno) => *errno == nix::errno::Errno::EPIPE,
            _ => false,
        }
    }

    /// True for the under/over-production protocol violations.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnderProduction { .. } | Self::OverProduction { .. }
        )
    }
}
