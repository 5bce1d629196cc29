//! API error handling
//!
//! Converts model errors into tagged JSON responses. Every failure body
//! carries a stable `kind` plus a human-readable message so clients can
//! match on the kind instead of scraping text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use helios_core::dto::ErrorResponse;

use crate::model::MasterError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, "request failed: {}", self.message);
        }
        let body = ErrorResponse {
            kind: self.kind.to_string(),
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<MasterError> for ApiError {
    fn from(err: MasterError) -> Self {
        let (status, kind) = match &err {
            MasterError::InvalidJob(_) => (StatusCode::BAD_REQUEST, "INVALID_JOB"),
            MasterError::HostNotRegistered(_) => (StatusCode::BAD_REQUEST, "HOST_NOT_REGISTERED"),
            MasterError::JobExists(_) => (StatusCode::CONFLICT, "JOB_EXISTS"),
            MasterError::AlreadyDeployed { .. } => (StatusCode::CONFLICT, "ALREADY_DEPLOYED"),
            MasterError::JobStillDeployed(_) => (StatusCode::CONFLICT, "JOB_STILL_DEPLOYED"),
            MasterError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            MasterError::HostNotFound(_) => (StatusCode::NOT_FOUND, "HOST_NOT_FOUND"),
            MasterError::DeploymentNotFound { .. } => {
                (StatusCode::NOT_FOUND, "DEPLOYMENT_NOT_FOUND")
            }
            MasterError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        };
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
