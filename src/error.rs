use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, invalid or expired credentials.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but lacking privilege.
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found (or not owned by the caller).
    #[error("{0}")]
    NotFound(String),

    /// Field-level validation failures.
    #[error("Validation failed")]
    Validation(Vec<String>),

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Unique key already taken.
    #[error("{0}")]
    DuplicateKey(String),

    /// Upload exceeds the configured ceiling.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Upload is not an accepted media type.
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// External catalog misconfigured or failing.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateKey(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AppError::Validation(details) => {
                tracing::debug!(?details, "Validation failed");
                json!({ "error": self.to_string(), "details": details })
            }
            _ if status.is_server_error() && !matches!(self, AppError::UpstreamUnavailable(_)) => {
                tracing::error!(error = %self, "Request error");
                json!({ "error": "Internal server error" })
            }
            _ => {
                tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
                json!({ "error": self.to_string() })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
