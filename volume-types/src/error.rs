// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Precondition,
    CommandFailed,
    Internal,
}

impl ErrorKind {
    /// HTTP status the plugin answers with for this kind of failure.
    ///
    /// Docker only distinguishes success from failure, so every recognised
    /// operational failure shares 400 and everything unexpected is 500.
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput | Self::NotFound | Self::Precondition | Self::CommandFailed => 400,
            Self::Internal => 500,
        }
    }

    pub fn is_internal(self) -> bool {
        self.code() >= 500
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct PluginFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl PluginFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Message placed in the `Err` field of the reply.
    ///
    /// Internal failures are not described to the caller; the details are
    /// in the daemon log.
    pub fn public_message(&self) -> &str {
        if self.kind.is_internal() {
            "InternalServerError"
        } else {
            &self.message
        }
    }
}
