use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lobby_bucket::BucketError;
use thiserror::Error;

/// Stable error codes. Clients match on `code` from
/// `{"code": "NOT_FOUND", "message": "..."}`, never on the message.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const TRANSPORT_FAILURE: &str = "TRANSPORT_FAILURE";
    pub const REMOTE_FAILURE: &str = "REMOTE_FAILURE";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Error returned by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Unknown backend, bucket or key. HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// HTTP 409.
    #[error("{0}")]
    Conflict(String),

    /// HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// The plugin could not be reached. HTTP 502.
    #[error("{0}")]
    Transport(String),

    /// The plugin answered with a failure. HTTP 502.
    #[error("{0}")]
    Remote(String),

    /// A backend has been closed. HTTP 503.
    #[error("{0}")]
    Unavailable(String),

    /// HTTP 500.
    #[error("{0}")]
    Storage(String),

    /// HTTP 500.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => error_code::NOT_FOUND,
            ApiError::Conflict(_) => error_code::ALREADY_EXISTS,
            ApiError::Validation(_) => error_code::VALIDATION_FAILED,
            ApiError::Transport(_) => error_code::TRANSPORT_FAILURE,
            ApiError::Remote(_) => error_code::REMOTE_FAILURE,
            ApiError::Unavailable(_) => error_code::UNAVAILABLE,
            ApiError::Storage(_) => error_code::STORAGE_ERROR,
            ApiError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Transport(_) | ApiError::Remote(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BucketError> for ApiError {
    fn from(err: BucketError) -> Self {
        let message = err.to_string();
        match err {
            BucketError::BackendNotFound(_)
            | BucketError::BucketNotFound(_)
            | BucketError::KeyNotFound(_) => ApiError::NotFound(message),
            BucketError::BucketAlreadyExists(_) => ApiError::Conflict(message),
            BucketError::InvalidArgument(_) => ApiError::Validation(message),
            BucketError::Transport(_) => ApiError::Transport(message),
            BucketError::Remote { .. } => ApiError::Remote(message),
            BucketError::Closed(_) => ApiError::Unavailable(message),
            BucketError::Storage(_) => ApiError::Storage(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
