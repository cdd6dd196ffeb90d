//! Filesystem layout: staging tree and the two publish trees (§2, §3).
//!
//! ```text
//! {root}/tmp/{upload_id}/parts/part-{n}
//! {root}/tmp/{upload_id}/input{ext}
//! {root}/videos/{lesson_id}/video.mp4
//! {root}/materials/{lesson_id}/{material_id}/{filename}
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path layout helper, cheap to clone (just a root `PathBuf`).
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join("tmp").join(upload_id)
    }

    pub fn parts_dir(&self, upload_id: &str) -> PathBuf {
        self.staging_dir(upload_id).join("parts")
    }

    pub fn part_path(&self, upload_id: &str, part_num: u32) -> PathBuf {
        self.parts_dir(upload_id).join(format!("part-{part_num}"))
    }

    /// Temp merge output, keeping the original extension as a hint for
    /// downstream probing tools (MergeWorker step 2).
    pub fn merge_output_path(&self, upload_id: &str, filename: &str) -> PathBuf {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        self.staging_dir(upload_id).join(format!("input{ext}"))
    }

    pub fn video_path(&self, lesson_id: &str) -> PathBuf {
        self.root.join("videos").join(lesson_id).join("video.mp4")
    }

    pub fn material_path(&self, lesson_id: &str, material_id: &str, filename: &str) -> PathBuf {
        self.root
            .join("materials")
            .join(lesson_id)
            .join(material_id)
            .join(filename)
    }

    pub fn materials_root(&self, lesson_id: &str) -> PathBuf {
        self.root.join("materials").join(lesson_id)
    }

    pub fn videos_root(&self, lesson_id: &str) -> PathBuf {
        self.root.join("videos").join(lesson_id)
    }

    /// Create the per-upload staging `parts/` directory at session init.
    pub async fn create_staging(&self, upload_id: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.parts_dir(upload_id)).await?;
        Ok(())
    }

    /// Remove `parts/` immediately after a successful merge.
    pub async fn remove_parts(&self, upload_id: &str) -> Result<(), StoreError> {
        let dir = self.parts_dir(upload_id);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Remove the full staging tree for an upload (post grace-delay cleanup).
    pub async fn remove_staging(&self, upload_id: &str) -> Result<(), StoreError> {
        let dir = self.staging_dir(upload_id);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Publish `temp_path` to `final_path`: rename, falling back to
    /// copy-then-remove on cross-device rename failure (§4.5 step 7).
    pub async fn publish(&self, temp_path: &Path, final_path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(temp_path, final_path).await {
            Ok(()) => {
                debug!("published {:?} -> {:?} via rename", temp_path, final_path);
                Ok(())
            }
            Err(_) => {
                fs::copy(temp_path, final_path).await?;
                fs::remove_file(temp_path).await?;
                debug!(
                    "published {:?} -> {:?} via copy (cross-device rename fallback)",
                    temp_path, final_path
                );
                Ok(())
            }
        }
    }

    pub async fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        fs::remove_file(path).await?;
        Ok(())
    }

    pub async fn remove_dir_all(&self, path: &Path) -> Result<(), StoreError> {
        fs::remove_dir_all(path).await?;
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_is_1_indexed_and_namespaced_by_upload() {
        let store = Store::new(PathBuf::from("/data"));
        assert_eq!(
            store.part_path("abc123", 1),
            PathBuf::from("/data/tmp/abc123/parts/part-1")
        );
    }

    #[test]
    fn merge_output_path_keeps_extension() {
        let store = Store::new(PathBuf::from("/data"));
        assert_eq!(
            store.merge_output_path("abc123", "lecture.mp4"),
            PathBuf::from("/data/tmp/abc123/input.mp4")
        );
        assert_eq!(
            store.merge_output_path("abc123", "no_extension"),
            PathBuf::from("/data/tmp/abc123/input")
        );
    }

    #[test]
    fn publish_paths_match_the_external_contract() {
        let store = Store::new(PathBuf::from("/data"));
        assert_eq!(
            store.video_path("lesson-1"),
            PathBuf::from("/data/videos/lesson-1/video.mp4")
        );
        assert_eq!(
            store.material_path("lesson-1", "mat-1", "slides.pdf"),
            PathBuf::from("/data/materials/lesson-1/mat-1/slides.pdf")
        );
    }

    #[tokio::test]
    async fn publish_renames_within_same_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_path_buf());
        let src = tmp.path().join("src.bin");
        tokio::fs::write(&src, b"hello").await.unwrap();
        let dst = tmp.path().join("nested").join("dst.bin");

        store.publish(&src, &dst).await.unwrap();

        assert!(!store.exists(&src).await);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn remove_staging_clears_the_whole_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_path_buf());
        let upload_id = "upload-with-parts";

        store.create_staging(upload_id).await.unwrap();
        for n in 1..=3u32 {
            tokio::fs::write(store.part_path(upload_id, n), b"x")
                .await
                .unwrap();
        }

        let before: Vec<_> = walkdir::WalkDir::new(store.staging_dir(upload_id))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .collect();
        assert_eq!(before.len(), 3);

        store.remove_staging(upload_id).await.unwrap();
        assert!(!store.exists(&store.staging_dir(upload_id)).await);
    }
}
