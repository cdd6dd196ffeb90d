//! Lesson-ingest service entrypoint.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use clap::Parser;
use lesson_ingest::access_control::AllowAll;
use lesson_ingest::api::handlers::{
    complete, delete_lesson, delete_material, delete_video, health_check, init_material,
    init_video, list_parts, status, upload_part, AppState,
};
use lesson_ingest::config::Config;
use lesson_ingest::duration_probe::NoopDurationProbe;
use lesson_ingest::merge::spawn_merge_workers;
use lesson_ingest::metrics::{LiveGauges, Metrics};
use lesson_ingest::notify::Notifier;
use lesson_ingest::registry::SessionRegistry;
use lesson_ingest::store::Store;
use lesson_ingest::writer_pool::WriterPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt};

/// Version string including build timestamp for --version output.
fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("INGEST_BUILD_TIME"),
        )
    })
}

/// Resumable, chunked lesson-media ingestion service
#[derive(Parser, Debug)]
#[command(name = "lesson-ingest")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config is loaded once here (before the tokio runtime exists) to read
    // blocking_threads, and again inside async_main() for full init. We
    // cannot build the runtime with the right blocking thread count unless
    // we read the config first.
    let pre_config = if let Some(ref path) = cli.config {
        Config::from_file(path).unwrap_or_else(|_| Config::load())
    } else {
        Config::load()
    };

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(bt) = pre_config.blocking_threads {
        runtime_builder.max_blocking_threads(bt);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let initial_filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("INGEST_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("lesson_ingest=trace,tower_http=trace")
            } else {
                EnvFilter::new("lesson_ingest=debug,tower_http=debug")
            }
        });

    let (filter_layer, _log_reload_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    info!(
        "Starting lesson-ingest v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("INGEST_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Storage root: {:?}", config.storage_root);
    info!("  Chunk size: {} MB", config.chunk_size_bytes / 1024 / 1024);
    info!("  Max concurrent sessions: {}", config.max_concurrent_sessions);

    if config.internal_api_key.is_none() {
        warn!("  Internal API key: not set — admin delete endpoints are open");
    }

    let metrics = Arc::new(Metrics::new());
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    let store = Store::new(config.storage_root.clone());
    tokio::fs::create_dir_all(&config.storage_root).await?;

    let registry = Arc::new(SessionRegistry::new(
        store.clone(),
        config.max_concurrent_sessions,
        config.chunk_size_bytes,
    ));

    let writer_pool = Arc::new(WriterPool::new(
        config.writer_pool_size,
        config.writer_queue_depth,
    ));

    let notifier = Arc::new(Notifier::new(
        config.completion_notify_base_url.clone(),
        config.public_base_url.clone(),
        config.completion_notify_timeout,
    ));

    let merge_queue = spawn_merge_workers(
        config.merge_worker_count,
        config.merge_queue_depth,
        registry.clone(),
        store.clone(),
        notifier.clone(),
        Arc::new(NoopDurationProbe),
        config.merge_copy_buffer_bytes,
        config.fsync_merged_output,
        config.cleanup_grace,
        Some(metrics.clone()),
    );

    // Periodic eviction of terminal sessions past their TTL (§4.1 EvictExpired).
    spawn_periodic(Duration::from_secs(60), {
        let registry = registry.clone();
        let ttl = config.session_ttl;
        move || registry.evict_expired(ttl)
    });

    let state = Arc::new(AppState {
        registry,
        store,
        writer_pool,
        merge_queue,
        notifier,
        duration_probe: Arc::new(NoopDurationProbe),
        access_control: Arc::new(AllowAll),
        internal_api_key: config.internal_api_key.clone(),
        fsync_parts: config.fsync_parts,
        metrics: Some(metrics.clone()),
        live_gauges: Default::default(),
    });

    // Keep the live gauges (writer/merge queue depth, active sessions) fresh
    // for the `/metrics` handler without touching either queue's internals
    // from the scrape path.
    spawn_periodic(Duration::from_secs(5), {
        let state = state.clone();
        move || {
            state
                .live_gauges
                .set_writer_queue_depth(state.writer_pool.queue_depth() as i64);
            state
                .live_gauges
                .set_merge_queue_depth(state.merge_queue.queue_depth() as i64);
            state
                .live_gauges
                .set_active_sessions(state.registry.admitted_count() as i64);
        }
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(lesson_ingest::metrics::metrics_handler))
        .route("/uploads/videos", post(init_video))
        .route("/uploads/files", post(init_material))
        .route("/uploads/:upload_id/parts/:n", put(upload_part))
        .route("/uploads/:upload_id/parts", get(list_parts))
        .route("/uploads/:upload_id/complete", post(complete))
        .route("/uploads/:upload_id/status", get(status))
        .route("/files/:lesson_id", delete(delete_lesson))
        .route("/files/:lesson_id/video", delete(delete_video))
        .route(
            "/files/:lesson_id/materials/:material_id",
            delete(delete_material),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            lesson_ingest::metrics::http_metrics_middleware,
        ))
        .layer(DefaultBodyLimit::max(
            config.chunk_size_bytes as usize + 1024 * 1024,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("lesson-ingest listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Spawn a background task that runs `f` every `interval`.
fn spawn_periodic(interval: Duration, f: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            f();
        }
    });
}

/// Handle shutdown signals (SIGINT, SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
