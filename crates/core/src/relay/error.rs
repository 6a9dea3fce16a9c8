//! Error types for the relay module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while starting or managing a stream session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Helper binary not found.
    #[error("Streaming helper not found: {path}")]
    HelperNotFound { path: PathBuf },

    /// Helper binary exists but may not be executed.
    #[error("Permission denied launching streaming helper: {path}")]
    PermissionDenied { path: PathBuf },

    /// Any other failure to spawn the helper.
    #[error("Failed to launch streaming helper {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The helper started but its stdout pipe was not handed over.
    #[error("Streaming helper stdout was not captured")]
    StdoutNotCaptured,

    /// No free slot for another helper process.
    #[error("Stream capacity exhausted ({limit} concurrent streams)")]
    AtCapacity { limit: usize },

    /// The relay is shutting down and admits no new sessions.
    #[error("Stream relay is shutting down")]
    ShuttingDown,

    /// The session was cancelled before the helper finished.
    #[error("Stream session cancelled")]
    Cancelled,

    /// The helper exited unsuccessfully after streaming began.
    #[error("Streaming helper exited with code {code:?}")]
    ProcessFailed {
        code: Option<i32>,
        stderr_tail: Vec<String>,
    },

    /// No live session has this id.
    #[error("Stream session not found: {0}")]
    SessionNotFound(String),
}

impl RelayError {
    /// Maps a spawn failure onto the matching start error.
    pub fn from_spawn(path: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::HelperNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Spawn { path, source },
        }
    }

    /// Whether the helper could not be started at all.
    pub fn is_start_error(&self) -> bool {
        matches!(
            self,
            Self::HelperNotFound { .. }
                | Self::PermissionDenied { .. }
                | Self::Spawn { .. }
                | Self::StdoutNotCaptured
        )
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::HelperNotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Spawn { .. } => "spawn_failed",
            Self::StdoutNotCaptured => "no_stdout",
            Self::AtCapacity { .. } => "at_capacity",
            Self::ShuttingDown => "shutting_down",
            Self::Cancelled => "cancelled",
            Self::ProcessFailed { .. } => "process_failed",
            Self::SessionNotFound(_) => "session_not_found",
        }
    }
}
