//! MergeQueue and MergeWorker: assembling uploaded parts into the final
//! artifact and publishing it (§4.5).

use crate::duration_probe::DurationProbe;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::registry::SessionRegistry;
use crate::store::Store;
use crate::types::{SessionSnapshot, UploadId, UploadKind, UploadStatus};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

/// One unit of merge work, carrying everything the worker needs without
/// re-touching the registry lock mid-merge.
pub struct MergeJob {
    pub upload_id: UploadId,
    pub snapshot: SessionSnapshot,
}

/// Bounded producer side of the merge pipeline. Enqueue is itself async and
/// blocks the caller when the queue is full — unlike `WriterPool::offer`,
/// there is no synchronous fallback here: merge work is heavier and rarer,
/// so a caller-side queue backpressure is acceptable (§4.5).
#[derive(Clone)]
pub struct MergeQueue {
    tx: mpsc::Sender<MergeJob>,
}

impl MergeQueue {
    pub async fn enqueue(&self, job: MergeJob) {
        if self.tx.send(job).await.is_err() {
            error!("merge queue closed; dropping merge job");
        }
    }

    /// Current queue depth, for the `merge_queue_depth` gauge.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Spawns `worker_count` tasks draining a bounded queue, each running the
/// assemble-hash-publish-notify-cleanup pipeline (§4.5 steps 1-9).
#[allow(clippy::too_many_arguments)]
pub fn spawn_merge_workers(
    worker_count: usize,
    queue_depth: usize,
    registry: Arc<SessionRegistry>,
    store: Store,
    notifier: Arc<Notifier>,
    duration_probe: Arc<dyn DurationProbe>,
    copy_buffer_bytes: usize,
    fsync_merged_output: bool,
    cleanup_grace: Duration,
    metrics: Option<Arc<Metrics>>,
) -> MergeQueue {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for worker_id in 0..worker_count {
        let rx = rx.clone();
        let registry = registry.clone();
        let store = store.clone();
        let notifier = notifier.clone();
        let duration_probe = duration_probe.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else {
                    info!(worker_id, "merge worker shutting down: queue closed");
                    break;
                };
                run_merge_job(
                    worker_id,
                    job,
                    &registry,
                    &store,
                    &notifier,
                    &duration_probe,
                    copy_buffer_bytes,
                    fsync_merged_output,
                    cleanup_grace,
                    metrics.as_deref(),
                )
                .await;
            }
        });
    }

    MergeQueue { tx }
}

#[instrument(skip_all, fields(upload_id = %job.upload_id, worker_id))]
#[allow(clippy::too_many_arguments)]
async fn run_merge_job(
    worker_id: usize,
    job: MergeJob,
    registry: &SessionRegistry,
    store: &Store,
    notifier: &Notifier,
    duration_probe: &Arc<dyn DurationProbe>,
    copy_buffer_bytes: usize,
    fsync_merged_output: bool,
    cleanup_grace: Duration,
    metrics: Option<&Metrics>,
) {
    let upload_id = job.upload_id;
    match registry.snapshot(upload_id) {
        Ok(snapshot) if snapshot.status.is_terminal() => {
            info!(worker_id, status = ?snapshot.status, "dropping merge job for already-terminal session");
            return;
        }
        Err(_) => {
            info!(worker_id, "dropping merge job for session no longer in registry");
            return;
        }
        _ => {}
    }
    registry.update_status(upload_id, UploadStatus::Merging, None);

    let started = Instant::now();
    let result = assemble_and_publish(&job.snapshot, store, copy_buffer_bytes, fsync_merged_output).await;
    if let Some(m) = metrics {
        m.merge_duration_seconds.observe(started.elapsed().as_secs_f64());
    }

    match result {
        Ok(final_path) => {
            registry.set_output_path(upload_id, final_path.clone());
            registry.update_status(upload_id, UploadStatus::Ready, None);
            info!(worker_id, path = ?final_path, "merge succeeded");
            if let Some(m) = metrics {
                m.merge_outcomes_total.with_label_values(&["ready"]).inc();
            }

            let duration_in_seconds = if matches!(job.snapshot.kind, UploadKind::Video) {
                match duration_probe.probe_seconds(&final_path).await {
                    Ok(secs) => Some(secs),
                    Err(e) => {
                        warn!(%e, "duration probe failed; proceeding with duration 0");
                        Some(0)
                    }
                }
            } else {
                None
            };

            let notified = notifier
                .notify_completion(&job.snapshot, &final_path, duration_in_seconds)
                .await;
            if !notified {
                if let Some(m) = metrics {
                    m.notification_failures_total.inc();
                }
            }

            if let Err(e) = store.remove_parts(&upload_id.to_string()).await {
                warn!(%e, "failed to remove parts directory after merge");
            }
            schedule_staging_cleanup(store.clone(), upload_id, cleanup_grace);
        }
        Err(e) => {
            error!(worker_id, error = %e, "merge failed");
            registry.update_status(upload_id, UploadStatus::Failed, Some(e.to_string()));
            if let Some(m) = metrics {
                m.merge_outcomes_total.with_label_values(&["failed"]).inc();
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum MergeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("failed to read part {part_num} from staging: {source}")]
    MissingPart {
        part_num: u32,
        source: std::io::Error,
    },
}

/// Streams every part in order into a temp file in the staging tree,
/// hashing as it goes (informational only — not verified against any
/// client-supplied digest, per the design note on integrity), then
/// publishes atomically to the artifact's final path.
async fn assemble_and_publish(
    snapshot: &SessionSnapshot,
    store: &Store,
    copy_buffer_bytes: usize,
    fsync_merged_output: bool,
) -> Result<std::path::PathBuf, MergeError> {
    let upload_id_str = snapshot.upload_id.to_string();
    let merge_output = store.merge_output_path(&upload_id_str, &snapshot.filename);

    {
        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&merge_output)
            .await?;

        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; copy_buffer_bytes.max(64 * 1024)];

        for part_num in 1..=snapshot.total_parts {
            let part_path = store.part_path(&upload_id_str, part_num);
            let mut part_file =
                tokio::fs::File::open(&part_path)
                    .await
                    .map_err(|source| MergeError::MissingPart { part_num, source })?;
            loop {
                let n = part_file
                    .read(&mut buf)
                    .await
                    .map_err(|source| MergeError::MissingPart { part_num, source })?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).await?;
                hasher.update(&buf[..n]);
            }
        }

        if fsync_merged_output {
            out.sync_all().await?;
        }

        let digest = hex::encode(hasher.finalize());
        info!(sha1 = %digest, "assembled upload content hash (informational)");
    }

    let final_path = match snapshot.kind {
        UploadKind::Video => store.video_path(&snapshot.lesson_id),
        UploadKind::Material => {
            let material_id = snapshot
                .material_id
                .as_deref()
                .unwrap_or("unknown");
            store.material_path(&snapshot.lesson_id, material_id, &snapshot.filename)
        }
    };

    store.publish(&merge_output, &final_path).await?;
    Ok(final_path)
}

/// Staging tree removal, delayed so a client retrying `GET status` right
/// after completion still finds a consistent filesystem (§4.5 step 9,
/// design note on cleanup grace).
fn schedule_staging_cleanup(store: Store, upload_id: UploadId, grace: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Err(e) = store.remove_staging(&upload_id.to_string()).await {
            warn!(%e, %upload_id, "failed to clean up staging tree");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::registry::{CreateSessionRequest, SessionRegistry};
    use crate::types::UploadKind;

    async fn setup() -> (Arc<SessionRegistry>, Store, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_path_buf());
        let registry = Arc::new(SessionRegistry::new(store.clone(), 8, 4));
        (registry, store, tmp)
    }

    #[tokio::test]
    async fn merge_assembles_parts_in_order_and_publishes() {
        let (registry, store, _tmp) = setup().await;
        let handle = registry
            .create_session(CreateSessionRequest {
                kind: UploadKind::Video,
                lesson_id: "lesson-9".to_string(),
                material_id: None,
                filename: "clip.mp4".to_string(),
                content_type: "video/mp4".to_string(),
                expected_size: 8,
            })
            .await
            .unwrap();
        let upload_id = handle.lock().upload_id;

        let upload_id_str = upload_id.to_string();
        tokio::fs::write(store.part_path(&upload_id_str, 1), b"AAAA")
            .await
            .unwrap();
        tokio::fs::write(store.part_path(&upload_id_str, 2), b"BBBB")
            .await
            .unwrap();
        registry.record_part(upload_id, 1, 4).unwrap();
        registry.record_part(upload_id, 2, 4).unwrap();
        let (snapshot, _) = registry.mark_complete(upload_id).unwrap();

        let notifier = Arc::new(Notifier::disabled());
        let duration_probe: Arc<dyn DurationProbe> = Arc::new(crate::duration_probe::NoopDurationProbe);
        run_merge_job(
            0,
            MergeJob { upload_id, snapshot },
            &registry,
            &store,
            &notifier,
            &duration_probe,
            1024,
            false,
            Duration::from_secs(0),
            None,
        )
        .await;

        let final_snapshot = registry.snapshot(upload_id).unwrap();
        assert_eq!(final_snapshot.status, UploadStatus::Ready);
        let final_path = final_snapshot.output_path.unwrap();
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"AAAABBBB");
    }

    #[tokio::test]
    async fn merge_failure_marks_session_failed_not_panicking() {
        let (registry, store, _tmp) = setup().await;
        let handle = registry
            .create_session(CreateSessionRequest {
                kind: UploadKind::Video,
                lesson_id: "lesson-bad".to_string(),
                material_id: None,
                filename: "clip.mp4".to_string(),
                content_type: "video/mp4".to_string(),
                expected_size: 4,
            })
            .await
            .unwrap();
        let upload_id = handle.lock().upload_id;
        registry.record_part(upload_id, 1, 4).unwrap();
        let (snapshot, _) = registry.mark_complete(upload_id).unwrap();
        // Deliberately do not write the part file to disk: the merge read fails.

        let notifier = Arc::new(Notifier::disabled());
        let duration_probe: Arc<dyn DurationProbe> = Arc::new(crate::duration_probe::NoopDurationProbe);
        run_merge_job(
            0,
            MergeJob { upload_id, snapshot },
            &registry,
            &store,
            &notifier,
            &duration_probe,
            1024,
            false,
            Duration::from_secs(0),
            None,
        )
        .await;

        let final_snapshot = registry.snapshot(upload_id).unwrap();
        assert_eq!(final_snapshot.status, UploadStatus::Failed);
        assert!(final_snapshot.error.unwrap().contains("part 1"));
    }

    #[tokio::test]
    async fn merge_job_for_already_terminal_session_is_dropped_not_asserted() {
        let (registry, store, _tmp) = setup().await;
        let handle = registry
            .create_session(CreateSessionRequest {
                kind: UploadKind::Video,
                lesson_id: "lesson-dup".to_string(),
                material_id: None,
                filename: "clip.mp4".to_string(),
                content_type: "video/mp4".to_string(),
                expected_size: 4,
            })
            .await
            .unwrap();
        let upload_id = handle.lock().upload_id;

        let upload_id_str = upload_id.to_string();
        tokio::fs::write(store.part_path(&upload_id_str, 1), b"AAAA")
            .await
            .unwrap();
        registry.record_part(upload_id, 1, 4).unwrap();
        let (snapshot, _) = registry.mark_complete(upload_id).unwrap();

        let notifier = Arc::new(Notifier::disabled());
        let duration_probe: Arc<dyn DurationProbe> = Arc::new(crate::duration_probe::NoopDurationProbe);

        // First job runs the session all the way to Ready.
        run_merge_job(
            0,
            MergeJob { upload_id, snapshot: snapshot.clone() },
            &registry,
            &store,
            &notifier,
            &duration_probe,
            1024,
            false,
            Duration::from_secs(0),
            None,
        )
        .await;
        assert_eq!(registry.snapshot(upload_id).unwrap().status, UploadStatus::Ready);

        // A second job for the same (now-terminal) session must be dropped,
        // not re-run `update_status` into a panic.
        run_merge_job(
            1,
            MergeJob { upload_id, snapshot },
            &registry,
            &store,
            &notifier,
            &duration_probe,
            1024,
            false,
            Duration::from_secs(0),
            None,
        )
        .await;
        assert_eq!(registry.snapshot(upload_id).unwrap().status, UploadStatus::Ready);
    }
}
