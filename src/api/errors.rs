//! Ingress error types and their JSON responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the ingress endpoints (§7).
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid upload token")]
    Unauthorized,

    #[error("unknown upload: {0}")]
    NotFound(String),

    #[error("too many uploads in flight")]
    TooManyInFlight,

    #[error("missing part {0}")]
    MissingPart(u32),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::TooManyInFlight => StatusCode::TOO_MANY_REQUESTS,
            IngestError::MissingPart(_) => StatusCode::BAD_REQUEST,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "ValidationError",
            IngestError::Unauthorized => "Unauthorized",
            IngestError::NotFound(_) => "NotFound",
            IngestError::TooManyInFlight => "TooManyInFlight",
            IngestError::MissingPart(_) => "MissingPart",
            IngestError::Internal(_) => "InternalError",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        });

        if matches!(self, IngestError::TooManyInFlight) {
            return (status, [("Retry-After", "60")], body).into_response();
        }

        (status, body).into_response()
    }
}

impl From<crate::registry::RegistryError> for IngestError {
    fn from(err: crate::registry::RegistryError) -> Self {
        match err {
            crate::registry::RegistryError::NotFound => {
                IngestError::NotFound("upload not found".to_string())
            }
            crate::registry::RegistryError::Unauthorized => IngestError::Unauthorized,
            crate::registry::RegistryError::TooManyInFlight => IngestError::TooManyInFlight,
            crate::registry::RegistryError::MissingPart(i) => IngestError::MissingPart(i),
            crate::registry::RegistryError::InvalidPart(msg) => IngestError::Validation(msg),
            crate::registry::RegistryError::Io(e) => IngestError::Internal(e.to_string()),
        }
    }
}
