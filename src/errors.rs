use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// `code` carries the S3-style error code clients switch on
/// (`NoSuchKey`, `BadDigest`, ...).
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let (status, code) = match &err {
            StorageError::BucketNameInvalid { .. } => (StatusCode::BAD_REQUEST, "InvalidBucketName"),
            StorageError::ObjectNameInvalid { .. } => (StatusCode::BAD_REQUEST, "InvalidObjectName"),
            StorageError::BucketNotFound { .. } => (StatusCode::NOT_FOUND, "NoSuchBucket"),
            StorageError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "NoSuchKey"),
            StorageError::BucketExists { .. } => (StatusCode::CONFLICT, "BucketAlreadyOwnedByYou"),
            StorageError::BucketNotEmpty { .. } => (StatusCode::CONFLICT, "BucketNotEmpty"),
            StorageError::ObjectExistsAsDirectory { .. } | StorageError::ParentIsObject { .. } => {
                (StatusCode::CONFLICT, "ObjectPathConflict")
            }
            StorageError::SizeMismatch { actual, expected, .. } if actual < expected => {
                (StatusCode::BAD_REQUEST, "IncompleteBody")
            }
            StorageError::SizeMismatch { .. } => (StatusCode::BAD_REQUEST, "EntityTooLarge"),
            StorageError::BadDigest { .. } => (StatusCode::BAD_REQUEST, "BadDigest"),
            StorageError::InvalidDigest { .. } => (StatusCode::BAD_REQUEST, "InvalidDigest"),
            StorageError::InvalidRange { .. } => (StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange"),
            StorageError::Io(_) | StorageError::Index(_) => {
                error!("storage failure: {}", err);
                return AppError::internal("internal storage error");
            }
        };
        AppError::new(status, code, err.to_string())
    }
}
