//! Pluggable authorization hook for the init endpoints (Open Questions: who
//! may call `CreateSession` for a given `lesson_id`).
//!
//! Upload-token possession (§4.1 ValidateToken) governs the per-session
//! endpoints once a session exists; this trait governs the earlier question
//! of whether the caller may create one at all. No implementation is wired
//! in by default — the owning application is expected to front this service
//! with its own authentication and supply lesson ownership checks here only
//! if it wants them enforced a second time at this layer.

use async_trait::async_trait;

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_init_upload(&self, lesson_id: &str, caller: Option<&str>) -> bool;
}

/// Default: every request is admitted. Matches the Non-goal that this
/// service does not itself own identity or lesson-ownership data.
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn can_init_upload(&self, _lesson_id: &str, _caller: Option<&str>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_admits_every_caller() {
        let ac = AllowAll;
        assert!(ac.can_init_upload("lesson-1", None).await);
        assert!(ac.can_init_upload("lesson-1", Some("user-42")).await);
    }
}
