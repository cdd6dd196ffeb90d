//! Completion notifications to the owning application (§4.5 step 8, §6).
//!
//! Best-effort: a failed notification does not roll back the upload's
//! terminal status. The owning application is expected to reconcile via
//! `GET /uploads/{id}/status` if a webhook is lost.

use crate::types::{SessionSnapshot, UploadKind};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

#[derive(Serialize)]
struct VideoNotification<'a> {
    lesson_id: &'a str,
    video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_in_seconds: Option<u64>,
}

#[derive(Serialize)]
struct MaterialNotification<'a> {
    lesson_id: &'a str,
    material_id: Option<&'a str>,
    file_url: String,
    filename: &'a str,
    size_bytes: u64,
    content_type: &'a str,
}

pub struct Notifier {
    client: Option<reqwest::Client>,
    base_url: Option<String>,
    public_base_url: String,
}

impl Notifier {
    pub fn new(base_url: Option<String>, public_base_url: String, timeout: Duration) -> Self {
        let client = base_url.as_ref().map(|_| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builds with static config")
        });
        Self {
            client,
            base_url,
            public_base_url,
        }
    }

    /// No-op notifier: used when no collaborator endpoint is configured, and
    /// in tests that don't exercise the HTTP path.
    pub fn disabled() -> Self {
        Self {
            client: None,
            base_url: None,
            public_base_url: String::new(),
        }
    }

    /// Returns `true` if nothing was owed (no collaborator configured) or
    /// the notification was accepted; `false` if it was attempted and
    /// failed or was rejected.
    pub async fn notify_completion(
        &self,
        snapshot: &SessionSnapshot,
        final_path: &std::path::Path,
        duration_in_seconds: Option<u64>,
    ) -> bool {
        let (Some(client), Some(base_url)) = (&self.client, &self.base_url) else {
            return true;
        };

        let public_url = self.public_url_for(final_path);
        let result = match snapshot.kind {
            UploadKind::Video => {
                client
                    .post(format!("{base_url}/internal/lessons/video-ready"))
                    .json(&VideoNotification {
                        lesson_id: &snapshot.lesson_id,
                        video_url: public_url,
                        duration_in_seconds,
                    })
                    .send()
                    .await
            }
            UploadKind::Material => {
                client
                    .post(format!("{base_url}/internal/lessons/material-ready"))
                    .json(&MaterialNotification {
                        lesson_id: &snapshot.lesson_id,
                        material_id: snapshot.material_id.as_deref(),
                        file_url: public_url,
                        filename: &snapshot.filename,
                        size_bytes: snapshot.expected_size,
                        content_type: &snapshot.content_type,
                    })
                    .send()
                    .await
            }
        };

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(
                    upload_id = %snapshot.upload_id,
                    status = %resp.status(),
                    "completion notification rejected by collaborator"
                );
                false
            }
            Err(e) => {
                warn!(
                    upload_id = %snapshot.upload_id,
                    error = %e,
                    "completion notification failed"
                );
                false
            }
        }
    }

    fn public_url_for(&self, final_path: &std::path::Path) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            final_path.to_string_lossy().trim_start_matches('/')
        )
    }
}
