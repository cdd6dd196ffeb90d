//! In-memory session registry: the upload state machine (§4.1, §4.3).
//!
//! Sessions are process-local (no clustering, per the Non-goals). The map
//! lock and the per-session lock are separate: the map lock guards only
//! insertion/lookup, never mutation of a session's fields, so a long-running
//! mutation on one session never blocks lookups of another.

use crate::store::Store;
use crate::types::{SessionSnapshot, UploadId, UploadKind, UploadSession, UploadStatus, UploadToken};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("upload not found")]
    NotFound,
    #[error("invalid upload token")]
    Unauthorized,
    #[error("too many uploads in flight")]
    TooManyInFlight,
    #[error("missing part {0}")]
    MissingPart(u32),
    #[error("{0}")]
    InvalidPart(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters accepted by `CreateSession`, already validated by the caller.
pub struct CreateSessionRequest {
    pub kind: UploadKind,
    pub lesson_id: String,
    pub material_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub expected_size: u64,
}

/// The in-memory mapping from upload-id to session record (§4.1).
pub struct SessionRegistry {
    sessions: RwLock<HashMap<UploadId, Arc<Mutex<UploadSession>>>>,
    admitted: AtomicUsize,
    max_concurrent: usize,
    chunk_size: u64,
    store: Store,
}

impl SessionRegistry {
    pub fn new(store: Store, max_concurrent: usize, chunk_size: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            admitted: AtomicUsize::new(0),
            max_concurrent,
            chunk_size,
            store,
        }
    }

    /// Allocate a session, enforcing admission (I6, P4).
    ///
    /// Lock order: admission counter first, then the session map — fixed and
    /// never reversed, to preclude deadlock (§5 Mutex discipline).
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<Arc<Mutex<UploadSession>>, RegistryError> {
        loop {
            let current = self.admitted.load(Ordering::SeqCst);
            if current >= self.max_concurrent {
                return Err(RegistryError::TooManyInFlight);
            }
            if self
                .admitted
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        let upload_id = UploadId::generate();
        let total_parts = UploadSession::total_parts_for(req.expected_size, self.chunk_size);

        let session = UploadSession {
            upload_id,
            kind: req.kind,
            lesson_id: req.lesson_id,
            material_id: req.material_id,
            filename: req.filename,
            content_type: req.content_type,
            expected_size: req.expected_size,
            chunk_size: self.chunk_size,
            total_parts,
            received_bytes: 0,
            parts_received: Default::default(),
            upload_token: UploadToken::generate(),
            status: UploadStatus::Initiated,
            created_at: chrono::Utc::now(),
            completed_at: None,
            output_path: None,
            error: None,
        };

        if let Err(e) = self.store.create_staging(&upload_id.to_string()).await {
            // Roll back admission — the session never becomes observable.
            self.admitted.fetch_sub(1, Ordering::SeqCst);
            return Err(RegistryError::Io(std::io::Error::other(e.to_string())));
        }

        let handle = Arc::new(Mutex::new(session));
        // upload_id was just generated from 128 random bits: a collision in
        // this process's lifetime is impossible by construction.
        self.sessions.write().insert(upload_id, handle.clone());

        Ok(handle)
    }

    fn get(&self, upload_id: UploadId) -> Result<Arc<Mutex<UploadSession>>, RegistryError> {
        self.sessions
            .read()
            .get(&upload_id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Constant-time token check (P3): callers must validate before touching
    /// any other session state.
    pub fn validate_token(&self, upload_id: UploadId, token: &str) -> Result<(), RegistryError> {
        let handle = self.get(upload_id)?;
        let session = handle.lock();
        if session.upload_token.matches(token) {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized)
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_parts(&self, upload_id: UploadId) -> Result<u32, RegistryError> {
        Ok(self.get(upload_id)?.lock().total_parts)
    }

    /// Record that `part_num` was persisted to disk. Idempotent (P1): a
    /// duplicate receipt of an already-recorded part is a no-op success.
    pub fn record_part(
        &self,
        upload_id: UploadId,
        part_num: u32,
        len: u64,
    ) -> Result<(), RegistryError> {
        let handle = self.get(upload_id)?;
        let mut session = handle.lock();

        if part_num < 1 || part_num > session.total_parts.max(1) {
            return Err(RegistryError::InvalidPart(format!(
                "part {part_num} out of range 1..={}",
                session.total_parts
            )));
        }

        if session.parts_received.contains(&part_num) {
            return Ok(());
        }

        session.parts_received.insert(part_num);
        session.received_bytes += len;
        if session.status == UploadStatus::Initiated {
            session.status = UploadStatus::Receiving;
        }
        Ok(())
    }

    /// Cross-check the in-memory bitmap against the staging directory (§4.1
    /// ListParts): a part counts as present only if both agree, guarding
    /// against silently dropped writes.
    pub async fn list_parts(
        &self,
        upload_id: UploadId,
    ) -> Result<(Vec<u32>, u32), RegistryError> {
        let handle = self.get(upload_id)?;
        let (bitmap, total_parts) = {
            let session = handle.lock();
            (
                session.parts_received.iter().copied().collect::<Vec<_>>(),
                session.total_parts,
            )
        };

        let mut present = Vec::with_capacity(bitmap.len());
        for part_num in bitmap {
            let path = self.store.part_path(&upload_id.to_string(), part_num);
            if self.store.exists(&path).await {
                present.push(part_num);
            }
        }
        present.sort_unstable();
        Ok((present, total_parts))
    }

    /// Verify I3 and transition to `Uploaded`, releasing admission (§4.1).
    ///
    /// Idempotent against retries: a session already past `{Initiated,
    /// Receiving}` is left untouched and its current snapshot is returned
    /// with `transitioned = false`, so a repeated `complete` call after a
    /// dropped response never drives a terminal session backwards. Callers
    /// must only enqueue a merge job when `transitioned` is true.
    pub fn mark_complete(
        &self,
        upload_id: UploadId,
    ) -> Result<(SessionSnapshot, bool), RegistryError> {
        let handle = self.get(upload_id)?;
        let mut session = handle.lock();

        if !matches!(session.status, UploadStatus::Initiated | UploadStatus::Receiving) {
            return Ok((SessionSnapshot::from(&*session), false));
        }

        for i in 1..=session.total_parts {
            if !session.parts_received.contains(&i) {
                return Err(RegistryError::MissingPart(i));
            }
        }

        let was_holding_admission = session.status.holds_admission();
        session.status = UploadStatus::Uploaded;
        drop(session);

        if was_holding_admission {
            self.admitted.fetch_sub(1, Ordering::SeqCst);
        }

        Ok((SessionSnapshot::from(&*handle.lock()), true))
    }

    /// Driven by MergeWorker. Terminal states are immutable (P6) — attempting
    /// to leave one is a programming error, not a recoverable condition.
    pub fn update_status(
        &self,
        upload_id: UploadId,
        new_status: UploadStatus,
        error: Option<String>,
    ) {
        let Ok(handle) = self.get(upload_id) else {
            return;
        };
        let mut session = handle.lock();
        assert!(
            !session.status.is_terminal(),
            "attempted to leave terminal status {:?} for {}",
            session.status,
            upload_id
        );
        session.status = new_status;
        session.error = error;
        if new_status.is_terminal() {
            session.completed_at = Some(chrono::Utc::now());
        }
    }

    /// May only be called during `Merging` or on entry to `Ready` (§4.1).
    pub fn set_output_path(&self, upload_id: UploadId, path: std::path::PathBuf) {
        let Ok(handle) = self.get(upload_id) else {
            return;
        };
        let mut session = handle.lock();
        debug_assert!(matches!(
            session.status,
            UploadStatus::Merging | UploadStatus::Ready
        ));
        session.output_path = Some(path);
    }

    pub fn snapshot(&self, upload_id: UploadId) -> Result<SessionSnapshot, RegistryError> {
        let handle = self.get(upload_id)?;
        Ok(SessionSnapshot::from(&*handle.lock()))
    }

    /// Remove terminal sessions older than `ttl` from the registry. Not part
    /// of the distilled spec; added per the Session TTL Open Question.
    pub fn evict_expired(&self, ttl: Duration) {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        self.sessions.write().retain(|_, handle| {
            let session = handle.lock();
            !(session.status.is_terminal()
                && session.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
    }

    /// Sessions currently holding an admission slot, for the `active_sessions` gauge.
    pub fn admitted_count(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }
}
