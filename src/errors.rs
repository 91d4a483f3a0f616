use crate::services::{upload_service::UploadError, validation::ValidationError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("{:#}", err);
        AppError::internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::BadRequest(msg) => AppError::bad_request(msg),
            UploadError::Validation(ValidationError::Io(io_err)) => {
                tracing::error!(error = %io_err, "failed to read staged upload");
                AppError::internal("failed to read uploaded file")
            }
            UploadError::Validation(other) => AppError::bad_request(other.to_string()),
            err @ UploadError::PayloadTooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            // Operators get the missing setting in the log; clients do not.
            UploadError::Config(config_err) => {
                tracing::error!(error = %config_err, "configuration error");
                AppError::internal("server is not configured to reach the object store")
            }
            err @ UploadError::Backend { .. } => {
                tracing::error!(error = %err, "object store failure");
                AppError::internal(err.to_string())
            }
            err @ UploadError::NotFound(_) => AppError::not_found(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ConfigError, services::object_store::ObjectStoreError};

    #[test]
    fn maps_taxonomy_to_status_codes() {
        let cases: Vec<(UploadError, StatusCode)> = vec![
            (UploadError::bad_request("missing file"), StatusCode::BAD_REQUEST),
            (
                ValidationError::SizeExceeded { max: 10 }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ValidationError::ExtensionRejected("exe".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::PayloadTooLarge {
                    declared: 20,
                    limit: 10,
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ConfigError::Missing("UPLOADER_SECRET_KEY").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                UploadError::Backend {
                    context: "storing file",
                    source: ObjectStoreError::backend("connection refused"),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (UploadError::NotFound("x".into()), StatusCode::NOT_FOUND),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn config_errors_do_not_name_settings_to_clients() {
        let app_err = AppError::from(UploadError::from(ConfigError::Missing(
            "UPLOADER_SECRET_KEY",
        )));
        assert!(!app_err.message.contains("SECRET"));
    }
}
