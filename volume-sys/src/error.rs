// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("Command [{command}] failed, error: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from [{command}]: {reason}")]
    Parse { command: String, reason: String },

    #[error("Process inspection failed: {0}")]
    Inspect(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SysError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SysError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(command: impl Into<String>, reason: impl Into<String>) -> Self {
        SysError::Parse {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
