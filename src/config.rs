//! Configuration for the lesson-ingest service: TOML file, environment
//! variables, and CLI overrides, in that order of increasing precedence.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Root of the staging + publish filesystem tree (tmp/, videos/, materials/)
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Fixed chunk size used to compute `total_parts` for every session
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,

    /// Admission ceiling: max sessions in {Initiated, Receiving} at once
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// WriterPool worker count (`W`)
    #[serde(default = "default_writer_pool_size")]
    pub writer_pool_size: usize,

    /// WriterPool bounded queue depth (`Q`)
    #[serde(default = "default_writer_queue_depth")]
    pub writer_queue_depth: usize,

    /// MergeWorker count (`M`)
    #[serde(default = "default_merge_worker_count")]
    pub merge_worker_count: usize,

    /// MergeQueue bounded depth
    #[serde(default = "default_merge_queue_depth")]
    pub merge_queue_depth: usize,

    /// Copy buffer size used while streaming parts into the merged output
    #[serde(default = "default_merge_copy_buffer_bytes")]
    pub merge_copy_buffer_bytes: usize,

    /// Grace delay before a completed upload's staging tree is removed
    #[serde(default = "default_cleanup_grace", with = "humantime_serde")]
    pub cleanup_grace: Duration,

    /// Minimum retention window before a terminal session is evicted from the registry
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Base URL of the upstream application's completion-notification endpoint
    #[serde(default)]
    pub completion_notify_base_url: Option<String>,

    /// Timeout for the completion-notification HTTP call
    #[serde(default = "default_notify_timeout", with = "humantime_serde")]
    pub completion_notify_timeout: Duration,

    /// Base URL used to build `video_url` / `file_url` in notifications
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Shared secret required on the admin delete endpoints (`X-Internal-API-Key`)
    #[serde(default)]
    pub internal_api_key: Option<String>,

    /// Whether to `fsync` each part write before signaling completion
    #[serde(default)]
    pub fsync_parts: bool,

    /// Whether to `fsync` the assembled output before publish
    #[serde(default)]
    pub fsync_merged_output: bool,

    /// Override for tokio's blocking-thread pool size; read before the
    /// runtime is built, so it cannot be changed once the process is up.
    #[serde(default)]
    pub blocking_threads: Option<usize>,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_chunk_size_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_max_concurrent_sessions() -> usize {
    64
}

fn default_writer_pool_size() -> usize {
    30
}

fn default_writer_queue_depth() -> usize {
    500
}

fn default_merge_worker_count() -> usize {
    5
}

fn default_merge_queue_depth() -> usize {
    100
}

fn default_merge_copy_buffer_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_cleanup_grace() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            storage_root: default_storage_root(),
            chunk_size_bytes: default_chunk_size_bytes(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            writer_pool_size: default_writer_pool_size(),
            writer_queue_depth: default_writer_queue_depth(),
            merge_worker_count: default_merge_worker_count(),
            merge_queue_depth: default_merge_queue_depth(),
            merge_copy_buffer_bytes: default_merge_copy_buffer_bytes(),
            cleanup_grace: default_cleanup_grace(),
            session_ttl: default_session_ttl(),
            completion_notify_base_url: None,
            completion_notify_timeout: default_notify_timeout(),
            public_base_url: default_public_base_url(),
            internal_api_key: None,
            fsync_parts: false,
            fsync_merged_output: false,
            blocking_threads: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables (`INGEST_*` prefix)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("INGEST_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }
        if let Ok(dir) = std::env::var("INGEST_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("INGEST_CHUNK_SIZE_BYTES") {
            if let Ok(parsed) = size.parse() {
                config.chunk_size_bytes = parsed;
            }
        }
        if let Ok(n) = std::env::var("INGEST_MAX_CONCURRENT_SESSIONS") {
            if let Ok(parsed) = n.parse() {
                config.max_concurrent_sessions = parsed;
            }
        }
        if let Ok(n) = std::env::var("INGEST_WRITER_POOL_SIZE") {
            if let Ok(parsed) = n.parse() {
                config.writer_pool_size = parsed;
            }
        }
        if let Ok(n) = std::env::var("INGEST_WRITER_QUEUE_DEPTH") {
            if let Ok(parsed) = n.parse() {
                config.writer_queue_depth = parsed;
            }
        }
        if let Ok(n) = std::env::var("INGEST_MERGE_WORKER_COUNT") {
            if let Ok(parsed) = n.parse() {
                config.merge_worker_count = parsed;
            }
        }
        if let Ok(n) = std::env::var("INGEST_MERGE_QUEUE_DEPTH") {
            if let Ok(parsed) = n.parse() {
                config.merge_queue_depth = parsed;
            }
        }
        if let Ok(url) = std::env::var("INGEST_COMPLETION_NOTIFY_BASE_URL") {
            config.completion_notify_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("INGEST_PUBLIC_BASE_URL") {
            config.public_base_url = url;
        }
        if let Ok(key) = std::env::var("INGEST_INTERNAL_API_KEY") {
            config.internal_api_key = Some(key);
        }
        if let Ok(v) = std::env::var("INGEST_FSYNC_PARTS") {
            config.fsync_parts = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("INGEST_FSYNC_MERGED_OUTPUT") {
            config.fsync_merged_output = v == "true" || v == "1";
        }
        if let Ok(n) = std::env::var("INGEST_BLOCKING_THREADS") {
            config.blocking_threads = n.parse().ok();
        }

        config
    }

    /// Load configuration from file if specified via `INGEST_CONFIG`, falling
    /// back to default search locations, then environment variables.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("INGEST_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["lesson-ingest.toml", "/etc/lesson-ingest/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Tiny inline shim for humantime-flavored `Duration` (de)serialization,
/// avoiding a dependency on `humantime-serde` for a single field shape.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        humantime::format_duration(*d).to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.chunk_size_bytes, 16 * 1024 * 1024);
        assert!(!config.fsync_parts);
    }

    #[test]
    fn test_config_parse_toml() {
        let toml = r#"
            listen_addr = "0.0.0.0:9090"
            storage_root = "/var/lib/lesson-ingest"
            cleanup_grace = "10m"
            session_ttl = "2h"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr.port(), 9090);
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/lesson-ingest"));
        assert_eq!(config.cleanup_grace, Duration::from_secs(600));
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
    }
}
