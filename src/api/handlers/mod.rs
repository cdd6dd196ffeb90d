//! Ingest API request handlers.
//!
//! Split into submodules by domain:
//! - `ingress` — init, upload-part, list-parts, complete, status
//! - `admin` — delete-lesson / delete-video / delete-material
//! - `health` — liveness probe

mod admin;
mod health;
mod ingress;

pub use admin::{delete_lesson, delete_material, delete_video};
pub use health::health_check;
pub use ingress::{complete, init_material, init_video, list_parts, status, upload_part};

use crate::access_control::AccessControl;
use crate::duration_probe::DurationProbe;
use crate::merge::MergeQueue;
use crate::metrics::{LiveGauges, Metrics};
use crate::notify::Notifier;
use crate::registry::SessionRegistry;
use crate::store::Store;
use crate::writer_pool::WriterPool;
use std::sync::Arc;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub store: Store,
    pub writer_pool: Arc<WriterPool>,
    pub merge_queue: MergeQueue,
    pub notifier: Arc<Notifier>,
    pub duration_probe: Arc<dyn DurationProbe>,
    pub access_control: Arc<dyn AccessControl>,
    pub internal_api_key: Option<String>,
    pub fsync_parts: bool,
    pub metrics: Option<Arc<Metrics>>,
    pub live_gauges: LiveGauges,
}
