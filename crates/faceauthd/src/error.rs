use crate::engine::EngineError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use faceauth_core::EncodeError;
use serde_json::json;
use std::fmt;

pub type ApiResult<T> = Result<T, ApiError>;

/// Which endpoint an unexpected failure happened in; appears in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Registration,
    Authentication,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Registration => f.write_str("registration"),
            Operation::Authentication => f.write_str("authentication"),
        }
    }
}

/// Every failure a request can end in. Rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("User ID is required")]
    MissingUserId,

    #[error("Image file is required")]
    MissingImage,

    #[error("Invalid multipart form: {0}")]
    InvalidForm(String),

    #[error("Upload exceeds the {0} byte limit")]
    UploadTooLarge(usize),

    #[error("No face detected in the image")]
    NoFace,

    #[error("Multiple faces detected. Please submit an image with only one face.")]
    MultipleFaces,

    #[error("No registered faces found in the database")]
    NoRegistrations,

    #[error("Face not recognized")]
    NotRecognized,

    #[error("Failed to store face data")]
    Storage(#[source] StoreError),

    #[error("Error processing face {operation}: {reason}")]
    Processing { operation: Operation, reason: String },

    #[error("Not found")]
    NotFound,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingUserId
            | ApiError::MissingImage
            | ApiError::InvalidForm(_)
            | ApiError::NoFace
            | ApiError::MultipleFaces => StatusCode::BAD_REQUEST,
            ApiError::NoRegistrations | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotRecognized => StatusCode::UNAUTHORIZED,
            ApiError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Storage(_) | ApiError::Processing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn processing(operation: Operation, reason: impl fmt::Display) -> Self {
        ApiError::Processing {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Map an engine failure. Face-count problems are the client's; anything
    /// else is a processing error for `operation`.
    pub fn from_engine(operation: Operation, err: EngineError) -> Self {
        match err {
            EngineError::Encode(EncodeError::NoFaceDetected) => ApiError::NoFace,
            EngineError::Encode(EncodeError::MultipleFacesDetected { .. }) => ApiError::MultipleFaces,
            other => ApiError::processing(operation, other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Storage(source) => {
                tracing::error!(error = %source, "storage failure");
            }
            e if status.is_server_error() => tracing::error!(error = %e, "request failed"),
            e => tracing::info!(status = status.as_u16(), error = %e, "request rejected"),
        }

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
