//! Duration-probe collaborator hook (§4.5 step 9).
//!
//! Probing a video file's duration is an external collaborator, explicitly
//! out of scope for this service (§1 Non-goals) — invoking a real prober
//! (e.g. shelling out to a media-inspection tool) is left to the owning
//! deployment. On any error the merge pipeline logs and proceeds with
//! duration 0 rather than failing the upload.

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe_seconds(&self, path: &Path) -> Result<u64, ProbeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("duration probing is not configured")]
    NotConfigured,
}

/// Default: no prober wired in. `probe_seconds` always fails with
/// `NotConfigured`, which the merge pipeline treats as duration 0.
pub struct NoopDurationProbe;

#[async_trait]
impl DurationProbe for NoopDurationProbe {
    async fn probe_seconds(&self, _path: &Path) -> Result<u64, ProbeError> {
        Err(ProbeError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_probe_always_reports_not_configured() {
        let probe = NoopDurationProbe;
        let result = probe.probe_seconds(Path::new("/data/videos/l1/video.mp4")).await;
        assert!(matches!(result, Err(ProbeError::NotConfigured)));
    }
}
