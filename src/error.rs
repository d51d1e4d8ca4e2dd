use axum::{Json,
    http::StatusCode,
    response::IntoResponse
};
use serde_json::json;
use thiserror::Error;

use crate::{database::MetadataError, storage::StorageError};

/// Coarse class of an ingestion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller's fault; nothing was written.
    Input,
    /// Bytes claimed to be an image but could not be decoded.
    Decode,
    /// Blob or metadata store failed. Not retried here.
    Store,
}

/// Why an ingestion request did not complete.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No file data provided")]
    MissingPayload,

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed upload: {0}")]
    Malformed(String),

    #[error("File type not allowed: .{0}")]
    DisallowedExtension(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Metadata store failure: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Blob store failure: {0}")]
    Blob(#[from] StorageError),

    /// A blob step failed after the row was written, leaving the blobs at
    /// `paths` out of step with the metadata store. Not cleaned up
    /// automatically.
    #[error("Blob and metadata stores disagree on {}: {source}", .paths.join(", "))]
    Orphaned {
        paths: Vec<String>,
        source: Box<IngestError>,
    },

    #[error("Image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::MissingPayload
            | IngestError::PayloadTooLarge { .. }
            | IngestError::Malformed(_)
            | IngestError::DisallowedExtension(_) => ErrorKind::Input,
            IngestError::Decode(_) => ErrorKind::Decode,
            IngestError::Metadata(_)
            | IngestError::Blob(_)
            | IngestError::Orphaned { .. }
            | IngestError::Worker(_) => ErrorKind::Store,
        }
    }

    /// A unique constraint lost a race with a concurrent ingest.
    pub fn is_conflict(&self) -> bool {
        match self {
            IngestError::Metadata(err) => err.is_conflict(),
            _ => false,
        }
    }
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnSupportedMediaType(String),

    #[error("Unprocessable image: {0}")]
    UnprocessableImage(String),

    #[error("Multipart error: {0}")]
    MultipartError(String),

    #[error("Upload failed: {0}")]
    IngestFailure(String),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match (&err, err.kind()) {
            (IngestError::PayloadTooLarge { .. }, _) => AppError::PayloadTooLarge(message),
            (IngestError::DisallowedExtension(_), _) => AppError::UnSupportedMediaType(message),
            (_, ErrorKind::Input) => AppError::BadRequest(message),
            (_, ErrorKind::Decode) => AppError::UnprocessableImage(message),
            (_, ErrorKind::Store) => {
                tracing::error!("Ingestion failed: {}", message);
                AppError::IngestFailure(message)
            }
        }
    }
}

/// Convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // Map application errors to HTTP status codes and messages
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::MultipartError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::UnSupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            AppError::UnprocessableImage(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::IngestFailure(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        // Return standardized JSON error response
        let body = Json(json!({"error": error_message}));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_client_statuses() {
        let too_large: AppError = IngestError::PayloadTooLarge { size: 10, max: 5 }.into();
        assert_eq!(too_large.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let disallowed: AppError = IngestError::DisallowedExtension("bin".into()).into();
        assert_eq!(disallowed.into_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let missing: AppError = IngestError::MissingPayload.into();
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_errors_are_server_errors_and_orphans_are_distinct() {
        let orphan = IngestError::Orphaned {
            paths: vec!["img/a.jpg".into(), "thumbs/a.jpg".into()],
            source: Box::new(StorageError::UploadError("offline".into()).into()),
        };
        assert_eq!(orphan.kind(), ErrorKind::Store);
        assert!(orphan.to_string().contains("img/a.jpg, thumbs/a.jpg"));
        assert!(!orphan.is_conflict());

        let app: AppError = orphan.into();
        assert_eq!(app.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_metadata_conflicts_are_retryable() {
        let conflict: IngestError = MetadataError::Conflict("filename".into()).into();
        assert!(conflict.is_conflict());

        let missing: IngestError = MetadataError::NotFound(4).into();
        assert!(!missing.is_conflict());
    }
}
