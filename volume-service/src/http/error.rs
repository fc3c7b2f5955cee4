// SPDX-License-Identifier: GPL-3.0-only

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;
use volume_types::{ErrorReply, PluginFailure};

use crate::error::ServiceError;

/// Failure reply in the plugin protocol: a status and an `Err` message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(super) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// The operation task died without producing a result.
    pub(super) fn task_failed(err: tokio::task::JoinError) -> Self {
        error!("Operation task failed: {err}");
        Self::from_failure(PluginFailure::from(ServiceError::Internal(err.to_string())))
    }

    fn from_failure(failure: PluginFailure) -> Self {
        let status = StatusCode::from_u16(failure.kind.code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, failure.public_message())
    }

    #[cfg(test)]
    pub(super) fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        error!("Request failed: {err}");
        Self::from_failure(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorReply { err: self.message })).into_response()
    }
}
