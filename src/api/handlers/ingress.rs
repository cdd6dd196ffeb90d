//! Ingress endpoints: init, upload-part, list-parts, complete, status (§4.4, §6).

use super::AppState;
use crate::api::errors::IngestError;
use crate::api::extractors::UploadAuth;
use crate::merge::MergeJob;
use crate::registry::CreateSessionRequest;
use crate::types::{
    InitUploadRequest, InitUploadResponse, ListPartsResponse, StatusResponse, UploadKind,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip(state, req))]
pub async fn init_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, IngestError> {
    let content_type = req.content_type.clone().unwrap_or_default();
    if content_type != "video/mp4" {
        return Err(IngestError::Validation(format!(
            "video uploads must use content_type video/mp4, got {content_type:?}"
        )));
    }
    init_upload(state, req, UploadKind::Video).await
}

#[instrument(skip(state, req))]
pub async fn init_material(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, IngestError> {
    if req.material_id.as_deref().unwrap_or("").is_empty() {
        return Err(IngestError::Validation(
            "material uploads require a non-empty material_id".to_string(),
        ));
    }
    init_upload(state, req, UploadKind::Material).await
}

async fn init_upload(
    state: Arc<AppState>,
    req: InitUploadRequest,
    kind: UploadKind,
) -> Result<Json<InitUploadResponse>, IngestError> {
    if req.lesson_id.is_empty() {
        return Err(IngestError::Validation("lesson_id must not be empty".to_string()));
    }
    if req.size == 0 {
        return Err(IngestError::Validation("size must be greater than zero".to_string()));
    }
    if !state
        .access_control
        .can_init_upload(&req.lesson_id, None)
        .await
    {
        return Err(IngestError::Unauthorized);
    }

    let handle = state
        .registry
        .create_session(CreateSessionRequest {
            kind,
            lesson_id: req.lesson_id,
            material_id: req.material_id,
            filename: req.filename,
            content_type: req.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            expected_size: req.size,
        })
        .await
        .map_err(|e| {
            if matches!(e, crate::registry::RegistryError::TooManyInFlight) {
                if let Some(metrics) = &state.metrics {
                    metrics.upload_admission_rejected_total.inc();
                }
            }
            e
        })?;

    let session = handle.lock();
    let upload_id = session.upload_id;
    let upload_token = session.upload_token.as_str().to_string();
    let chunk_size = session.chunk_size;
    drop(session);

    Ok(Json(InitUploadResponse {
        upload_id,
        upload_token,
        chunk_size,
        put_url: format!("/uploads/{upload_id}/parts/{{n}}"),
    }))
}

/// PUT /uploads/{upload_id}/parts/{n}
#[instrument(skip(state, body))]
pub async fn upload_part(
    State(state): State<Arc<AppState>>,
    UploadAuth { upload_id }: UploadAuth,
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> Result<StatusCode, IngestError> {
    let part_num: u32 = params
        .get("n")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| IngestError::Validation("part number must be a positive integer".to_string()))?;

    let chunk_size = state.registry.chunk_size();
    if body.len() as u64 > chunk_size {
        return Err(IngestError::Validation(format!(
            "part {part_num} exceeds chunk_size {chunk_size}"
        )));
    }

    let path = state.store.part_path(&upload_id.to_string(), part_num);
    // Not holding the session lock while awaiting: `record_part` only takes
    // it after the write itself has completed (§4.4).
    let completion = state.writer_pool.offer(path, body.clone(), state.fsync_parts);
    if completion.overflowed() {
        if let Some(metrics) = &state.metrics {
            metrics.writer_pool_overflow_total.inc();
        }
    }
    completion
        .wait()
        .await
        .map_err(|e| IngestError::Internal(e.to_string()))?;

    state
        .registry
        .record_part(upload_id, part_num, body.len() as u64)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /uploads/{upload_id}/parts
#[instrument(skip(state))]
pub async fn list_parts(
    State(state): State<Arc<AppState>>,
    UploadAuth { upload_id }: UploadAuth,
) -> Result<Json<ListPartsResponse>, IngestError> {
    let (received, total) = state.registry.list_parts(upload_id).await?;
    let missing = total.saturating_sub(received.len() as u32);
    Ok(Json(ListPartsResponse {
        received,
        total,
        missing,
    }))
}

/// POST /uploads/{upload_id}/complete
#[instrument(skip(state))]
pub async fn complete(
    State(state): State<Arc<AppState>>,
    UploadAuth { upload_id }: UploadAuth,
) -> Result<StatusCode, IngestError> {
    let (snapshot, transitioned) = state.registry.mark_complete(upload_id)?;
    if transitioned {
        state
            .merge_queue
            .enqueue(MergeJob { upload_id, snapshot })
            .await;
    }
    Ok(StatusCode::ACCEPTED)
}

/// GET /uploads/{upload_id}/status
#[instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    UploadAuth { upload_id }: UploadAuth,
) -> Result<Json<StatusResponse>, IngestError> {
    let snapshot = state.registry.snapshot(upload_id)?;
    let (received, _total) = state.registry.list_parts(upload_id).await?;
    Ok(Json(StatusResponse {
        upload_id: snapshot.upload_id,
        status: snapshot.status,
        received_bytes: snapshot.received_bytes,
        total_parts: snapshot.total_parts,
        parts_received: received.len() as u32,
        output_path: snapshot.output_path.map(|p| p.to_string_lossy().to_string()),
        error: snapshot.error,
    }))
}
