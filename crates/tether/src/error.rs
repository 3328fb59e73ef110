//! Task-level error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

use crate::camera::{CameraError, CameraOp};
use crate::session::SessionError;

/// Errors surfaced to the workflow host.
///
/// Cancellation normally resolves a task to `TaskOutcome::Cancelled`; the
/// `Cancelled` variant here only appears when the device itself reports an
/// aborted operation.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("camera is not connected")]
    DeviceNotConnected,

    #[error("unable to {op}: {message}")]
    OperationFailed { op: CameraOp, message: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("no filename available in session directory")]
    NoFilenameAvailable,

    #[error("camera does not support {0}")]
    Unsupported(CameraOp),

    #[error("a capture or preview task is already running")]
    TaskActive,

    #[error("no camera attached")]
    NoCamera,

    #[error("no session attached")]
    NoSession,

    #[error("invalid filename pattern '{0}'")]
    InvalidPattern(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl TetherError {
    /// Whether the host should present this as a failure to the operator.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TetherError::Cancelled)
    }
}

impl From<CameraError> for TetherError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::NotConnected => TetherError::DeviceNotConnected,
            CameraError::OperationFailed { op, message } => {
                TetherError::OperationFailed { op, message }
            }
            CameraError::Cancelled { .. } => TetherError::Cancelled,
            CameraError::Unsupported(op) => TetherError::Unsupported(op),
        }
    }
}

impl From<SessionError> for TetherError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NoFilenameAvailable { .. } => TetherError::NoFilenameAvailable,
            SessionError::InvalidPattern(pattern) => TetherError::InvalidPattern(pattern),
            SessionError::Io { path, source } => TetherError::Io { path, source },
        }
    }
}
