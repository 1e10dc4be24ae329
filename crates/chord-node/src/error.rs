//! Application errors that can be automatically turned into an appropriate
//! HTTP response (§7).

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorWrapper {
    error: ProblemDetails,
}

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    title: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("key not found")]
    NotFound,
    #[error("downstream request failed: {0}")]
    Forward(#[from] reqwest::Error),
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("rejected: {0}")]
    Rejected(&'static str),
    #[error("invalid configuration: {0}")]
    ConfigInvalid(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forward(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Rejected(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(status = ?status, message = ?self, "request failed");
        }

        let body = Json(ErrorWrapper {
            error: ProblemDetails {
                title: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}
