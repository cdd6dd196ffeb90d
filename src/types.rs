//! Core types for the lesson-ingest upload session engine

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 128-bit upload identifier, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId([u8; 16]);

impl UploadId {
    /// Generate a fresh, process-unique identifier from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for UploadId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UploadId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UploadId::parse(&s).ok_or_else(|| serde::de::Error::custom("invalid upload id"))
    }
}

/// A 256-bit capability token granting upload/list/complete rights on one upload.
///
/// `Debug` is hand-rolled to redact the value (I5): the token must never be
/// logged or returned after init.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Constant-time equality check against the session's stored token.
    pub fn matches(&self, other: &str) -> bool {
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.as_bytes()).into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UploadToken(REDACTED)")
    }
}

/// The two kinds of artifact an upload session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Video,
    Material,
}

/// Upload lifecycle status (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Initiated,
    Receiving,
    Uploaded,
    Merging,
    Ready,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Ready | UploadStatus::Failed)
    }

    /// Sessions in these statuses count against the admission ceiling (I6).
    pub fn holds_admission(self) -> bool {
        matches!(self, UploadStatus::Initiated | UploadStatus::Receiving)
    }
}

/// The full mutable record for one upload, held behind the registry's per-session lock.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub kind: UploadKind,
    pub lesson_id: String,
    pub material_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub expected_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub received_bytes: u64,
    pub parts_received: std::collections::BTreeSet<u32>,
    pub upload_token: UploadToken,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<std::path::PathBuf>,
    pub error: Option<String>,
}

impl UploadSession {
    pub fn total_parts_for(expected_size: u64, chunk_size: u64) -> u32 {
        if expected_size == 0 {
            0
        } else {
            expected_size.div_ceil(chunk_size) as u32
        }
    }
}

/// Read-only copy of a session, safe to hand to callers outside the session lock.
/// Deliberately omits `upload_token` (I5) and the raw `parts_received` bitmap.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub upload_id: UploadId,
    pub kind: UploadKind,
    pub lesson_id: String,
    pub material_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub expected_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub received_bytes: u64,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<std::path::PathBuf>,
    pub error: Option<String>,
}

impl From<&UploadSession> for SessionSnapshot {
    fn from(s: &UploadSession) -> Self {
        Self {
            upload_id: s.upload_id,
            kind: s.kind,
            lesson_id: s.lesson_id.clone(),
            material_id: s.material_id.clone(),
            filename: s.filename.clone(),
            content_type: s.content_type.clone(),
            expected_size: s.expected_size,
            chunk_size: s.chunk_size,
            total_parts: s.total_parts,
            received_bytes: s.received_bytes,
            status: s.status,
            created_at: s.created_at,
            completed_at: s.completed_at,
            output_path: s.output_path.clone(),
            error: s.error.clone(),
        }
    }
}

/// Request body for both init endpoints.
#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub lesson_id: String,
    pub filename: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub material_id: Option<String>,
}

/// Response body for both init endpoints.
#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub upload_id: UploadId,
    pub upload_token: String,
    pub chunk_size: u64,
    pub put_url: String,
}

/// Response body for `GET /uploads/{upload_id}/parts`.
#[derive(Debug, Serialize)]
pub struct ListPartsResponse {
    pub received: Vec<u32>,
    pub total: u32,
    pub missing: u32,
}

/// Response body for `GET /uploads/{upload_id}/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    pub received_bytes: u64,
    pub total_parts: u32,
    pub parts_received: u32,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_id_roundtrips_through_text() {
        let id = UploadId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(UploadId::parse(&text), Some(id));
    }

    #[test]
    fn upload_id_rejects_garbage() {
        assert_eq!(UploadId::parse("not-hex"), None);
        assert_eq!(UploadId::parse("ab"), None);
    }

    #[test]
    fn token_matches_is_constant_time_and_correct() {
        let token = UploadToken::generate();
        assert!(token.matches(token.as_str()));
        assert!(!token.matches("wrong"));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = UploadToken::generate();
        let debug = format!("{:?}", token);
        assert_eq!(debug, "UploadToken(REDACTED)");
        assert!(!debug.contains(token.as_str()));
    }

    #[test]
    fn total_parts_rounds_up() {
        assert_eq!(
            UploadSession::total_parts_for(48 * 1024 * 1024, 16 * 1024 * 1024),
            3
        );
        assert_eq!(UploadSession::total_parts_for(1, 16 * 1024 * 1024), 1);
        assert_eq!(UploadSession::total_parts_for(0, 16 * 1024 * 1024), 0);
    }
}
