//! Custom Axum extractors enforcing the token checks before any handler body
//! runs (P3: auth failure is rejected before touching session state or disk).

use super::errors::IngestError;
use super::handlers::AppState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path},
    http::request::Parts,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Extracts `upload_id` from the path (regardless of how many other dynamic
/// segments the route carries) and validates the `X-Upload-Token` header
/// against the registry in one step.
#[derive(Debug, Clone, Copy)]
pub struct UploadAuth {
    pub upload_id: crate::types::UploadId,
}

#[async_trait]
impl<S> FromRequestParts<S> for UploadAuth
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = IngestError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| IngestError::Validation("missing upload_id path segment".to_string()))?;
        let upload_id_str = params
            .get("upload_id")
            .ok_or_else(|| IngestError::Validation("missing upload_id path segment".to_string()))?;

        let upload_id = crate::types::UploadId::parse(upload_id_str)
            .ok_or_else(|| IngestError::NotFound(upload_id_str.clone()))?;

        let token = parts
            .headers
            .get("X-Upload-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or(IngestError::Unauthorized)?;

        let app_state = Arc::<AppState>::from_ref(state);
        app_state.registry.validate_token(upload_id, token)?;

        Ok(UploadAuth { upload_id })
    }
}

/// Validates `X-Internal-API-Key` against the configured secret (same
/// constant-time discipline as upload tokens).
pub struct InternalApiKey;

#[async_trait]
impl<S> FromRequestParts<S> for InternalApiKey
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = IngestError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let Some(expected) = &app_state.internal_api_key else {
            // No key configured: admin endpoints are open. Operators are
            // expected to front this service with their own network policy.
            return Ok(InternalApiKey);
        };

        let provided = parts
            .headers
            .get("X-Internal-API-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or(IngestError::Unauthorized)?;

        use subtle::ConstantTimeEq;
        if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
            Ok(InternalApiKey)
        } else {
            Err(IngestError::Unauthorized)
        }
    }
}
