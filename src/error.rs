//! Typed errors: startup taxonomy and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures on the bootstrap path. None of these are caught or retried:
/// any failure during startup propagates and aborts the process.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
    #[error("missing connection field '{0}'")]
    MissingField(&'static str),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("config load: {0}")]
    ConfigLoad(String),
    #[error("database connect: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("schema migration: {0}")]
    Migration(#[source] sqlx::Error),
    #[error("listen: {0}")]
    Listen(#[source] std::io::Error),
}

impl StartupError {
    /// True for the configuration class: errors raised before any connect attempt.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StartupError::UnknownBackend(_)
                | StartupError::MissingField(_)
                | StartupError::InvalidModel(_)
                | StartupError::ConfigLoad(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
