//! Shared test infrastructure for integration tests.
//!
//! Spawns the real `lesson-ingest` binary against a scratch storage root
//! and drives it over HTTP, the same way a chunking client would.

#![allow(dead_code)]

use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(18900);

pub struct TestServer {
    process: Child,
    pub base_url: String,
    _storage_dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a config-overriding closure applied to the `Command`
    /// before spawn, e.g. to set `INGEST_MAX_CONCURRENT_SESSIONS`.
    pub async fn start_with(configure: impl FnOnce(&mut Command)) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let storage_dir = TempDir::new().expect("failed to create temp storage dir");
        let base_url = format!("http://127.0.0.1:{port}");

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_lesson-ingest"));
        cmd.env("INGEST_LISTEN_ADDR", format!("127.0.0.1:{port}"))
            .env("INGEST_STORAGE_ROOT", storage_dir.path())
            .env("INGEST_CHUNK_SIZE_BYTES", (16 * 1024 * 1024).to_string())
            .env("RUST_LOG", "lesson_ingest=warn");
        configure(&mut cmd);

        let process = cmd.spawn().expect("failed to spawn lesson-ingest binary");

        let server = Self {
            process,
            base_url,
            _storage_dir: storage_dir,
        };
        server.wait_until_ready().await;
        server
    }

    async fn wait_until_ready(&self) {
        let client = reqwest::Client::new();
        for _ in 0..100 {
            if client
                .get(format!("{}/health", self.base_url))
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false)
            {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("lesson-ingest did not become healthy in time");
    }

    pub fn storage_path(&self) -> &std::path::Path {
        self._storage_dir.path()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Deterministic filler bytes for a part of the given size, seeded so
/// tests can assert byte-identical reassembly across part orderings.
pub fn part_bytes(seed: u8, len: usize) -> Vec<u8> {
    vec![seed; len]
}
