//! Administrative delete endpoints (§4.6, §6). Operate directly on the Store
//! and do not touch SessionRegistry: an in-flight upload for a deleted
//! lesson is an accepted inconsistency window, not a bug (§4.6).

use super::AppState;
use crate::api::errors::IngestError;
use crate::api::extractors::InternalApiKey;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::instrument;

/// DELETE /files/{lesson_id}
#[instrument(skip(state))]
pub async fn delete_lesson(
    State(state): State<Arc<AppState>>,
    _auth: InternalApiKey,
    Path(lesson_id): Path<String>,
) -> Result<StatusCode, IngestError> {
    let video_dir = state.store.videos_root(&lesson_id);
    let materials_dir = state.store.materials_root(&lesson_id);
    remove_if_exists(&state, &video_dir).await?;
    remove_if_exists(&state, &materials_dir).await?;
    Ok(StatusCode::OK)
}

/// DELETE /files/{lesson_id}/video
#[instrument(skip(state))]
pub async fn delete_video(
    State(state): State<Arc<AppState>>,
    _auth: InternalApiKey,
    Path(lesson_id): Path<String>,
) -> Result<StatusCode, IngestError> {
    let path = state.store.video_path(&lesson_id);
    if state.store.exists(&path).await {
        state
            .store
            .remove_file(&path)
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))?;
    }
    Ok(StatusCode::OK)
}

/// DELETE /files/{lesson_id}/materials/{material_id}
#[instrument(skip(state))]
pub async fn delete_material(
    State(state): State<Arc<AppState>>,
    _auth: InternalApiKey,
    Path((lesson_id, material_id)): Path<(String, String)>,
) -> Result<StatusCode, IngestError> {
    let dir = state
        .store
        .materials_root(&lesson_id)
        .join(&material_id);
    remove_if_exists(&state, &dir).await
}

async fn remove_if_exists(
    state: &AppState,
    path: &std::path::Path,
) -> Result<StatusCode, IngestError> {
    if state.store.exists(path).await {
        state
            .store
            .remove_dir_all(path)
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))?;
    }
    Ok(StatusCode::OK)
}
