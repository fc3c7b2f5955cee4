// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;
use volume_sys::SysError;
use volume_types::{ErrorKind, PluginFailure};

/// Failures of lifecycle and group operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Command [{command}] failed, error: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PreconditionViolation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unexpected output from [{command}]: {reason}")]
    Parse { command: String, reason: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::CommandFailed { .. } => ErrorKind::CommandFailed,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::PreconditionViolation(_) => ErrorKind::Precondition,
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidInput,
            ServiceError::Parse { .. } | ServiceError::Io { .. } | ServiceError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<SysError> for ServiceError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::CommandFailed {
                command,
                code,
                stderr,
            } => ServiceError::CommandFailed {
                command,
                code,
                stderr,
            },
            SysError::Parse { command, reason } => ServiceError::Parse { command, reason },
            SysError::Io { path, source } => ServiceError::Io { path, source },
            SysError::Inspect(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<ServiceError> for PluginFailure {
    fn from(err: ServiceError) -> Self {
        PluginFailure::new(err.kind(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
