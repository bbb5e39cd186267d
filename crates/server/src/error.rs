//! Service and API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use librarian_core::ContentId;
use librarian_metadata::MetadataError;
use librarian_storage::StorageError;
use serde::Serialize;

/// Errors from upload and fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum LibrarianError {
    /// The alias is missing, tombstoned, or access was denied. These are
    /// deliberately indistinguishable.
    #[error("not found")]
    NotFound,

    #[error("sha1 mismatch: declared {expected}, received {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("size mismatch: declared {declared} bytes, received {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("content id {0} already exists")]
    DuplicateContentId(ContentId),

    #[error("upload too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("could not allocate a free content id after {0} attempts")]
    IdExhausted(u32),

    #[error("upload body error: {0}")]
    Body(String),

    #[error("{0}")]
    Invalid(#[from] librarian_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for service operations.
pub type LibrarianResult<T> = std::result::Result<T, LibrarianError>;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("length required")]
    LengthRequired,

    #[error(transparent)]
    Librarian(#[from] LibrarianError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::LengthRequired => "length_required",
            Self::Librarian(e) => match e {
                LibrarianError::NotFound => "not_found",
                LibrarianError::DigestMismatch { .. } => "digest_mismatch",
                LibrarianError::SizeMismatch { .. } => "size_mismatch",
                LibrarianError::DuplicateContentId(_) => "duplicate_content_id",
                LibrarianError::TooLarge { .. } => "too_large",
                LibrarianError::Invalid(_) | LibrarianError::Body(_) => "bad_request",
                LibrarianError::IdExhausted(_) => "id_exhausted",
                LibrarianError::Metadata(_) => "metadata_error",
                LibrarianError::Storage(_) => "storage_error",
                LibrarianError::Io(_) => "io_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::Librarian(e) => match e {
                LibrarianError::NotFound => StatusCode::NOT_FOUND,
                LibrarianError::DigestMismatch { .. }
                | LibrarianError::SizeMismatch { .. }
                | LibrarianError::Invalid(_)
                | LibrarianError::Body(_) => StatusCode::BAD_REQUEST,
                LibrarianError::DuplicateContentId(_) => StatusCode::CONFLICT,
                LibrarianError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                LibrarianError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                LibrarianError::Metadata(MetadataError::Database(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                LibrarianError::IdExhausted(_)
                | LibrarianError::Metadata(_)
                | LibrarianError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (LibrarianError::NotFound.into(), StatusCode::NOT_FOUND),
            (
                LibrarianError::DigestMismatch {
                    expected: "a".into(),
                    actual: "b".into(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                LibrarianError::SizeMismatch {
                    declared: 1,
                    actual: 2,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                LibrarianError::DuplicateContentId(ContentId::new(3).unwrap()).into(),
                StatusCode::CONFLICT,
            ),
            (
                LibrarianError::Storage(StorageError::Remote("down".into())).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status_code(), status, "{error:?}");
        }
    }

    #[test]
    fn test_not_found_message_is_uniform() {
        let direct = ApiError::NotFound;
        let via_service: ApiError = LibrarianError::NotFound.into();
        assert_eq!(direct.to_string(), via_service.to_string());
        assert_eq!(direct.code(), via_service.code());
    }
}
