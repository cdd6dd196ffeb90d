//! Prometheus metrics for the lesson-ingest service (§4.7).
//!
//! All metric types use atomics internally (no locks on the hot path). The
//! `Metrics` struct is `Clone`-cheap (Arc-based registry + Arc-based
//! collectors).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for the ingest service.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub ingest_requests_total: IntCounterVec,
    pub ingest_request_duration_seconds: HistogramVec,

    // -- Admission & sessions --
    pub upload_admission_rejected_total: IntCounter,
    pub active_sessions: Gauge,

    // -- WriterPool --
    pub writer_pool_queue_depth: Gauge,
    pub writer_pool_overflow_total: IntCounter,

    // -- Merge pipeline --
    pub merge_queue_depth: Gauge,
    pub merge_duration_seconds: Histogram,
    pub merge_outcomes_total: IntCounterVec,

    // -- Notifications --
    pub notification_failures_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("ingest_build_info", "Build information"),
            &["version"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        let ingest_requests_total = IntCounterVec::new(
            Opts::new(
                "ingest_requests_total",
                "Total ingest HTTP requests by endpoint and outcome",
            ),
            &["endpoint", "status"],
        )
        .unwrap();
        registry
            .register(Box::new(ingest_requests_total.clone()))
            .unwrap();

        let ingest_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ingest_request_duration_seconds",
                "Ingest HTTP request duration in seconds",
            ),
            &["endpoint"],
        )
        .unwrap();
        registry
            .register(Box::new(ingest_request_duration_seconds.clone()))
            .unwrap();

        let upload_admission_rejected_total = IntCounter::new(
            "upload_admission_rejected_total",
            "Total CreateSession calls rejected for exceeding the admission ceiling",
        )
        .unwrap();
        registry
            .register(Box::new(upload_admission_rejected_total.clone()))
            .unwrap();

        let active_sessions = Gauge::new(
            "active_sessions",
            "Sessions currently holding an admission slot (updated on scrape)",
        )
        .unwrap();
        registry
            .register(Box::new(active_sessions.clone()))
            .unwrap();

        let writer_pool_queue_depth = Gauge::new(
            "writer_pool_queue_depth",
            "Current depth of the writer pool's bounded queue (updated on scrape)",
        )
        .unwrap();
        registry
            .register(Box::new(writer_pool_queue_depth.clone()))
            .unwrap();

        let writer_pool_overflow_total = IntCounter::new(
            "writer_pool_overflow_total",
            "Total writes that overflowed the writer pool queue and fell back to synchronous write",
        )
        .unwrap();
        registry
            .register(Box::new(writer_pool_overflow_total.clone()))
            .unwrap();

        let merge_queue_depth = Gauge::new(
            "merge_queue_depth",
            "Current depth of the merge queue (updated on scrape)",
        )
        .unwrap();
        registry
            .register(Box::new(merge_queue_depth.clone()))
            .unwrap();

        let merge_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "merge_duration_seconds",
                "Time spent assembling and publishing an upload",
            )
            .buckets(vec![
                0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ]),
        )
        .unwrap();
        registry
            .register(Box::new(merge_duration_seconds.clone()))
            .unwrap();

        let merge_outcomes_total = IntCounterVec::new(
            Opts::new("merge_outcomes_total", "Terminal merge outcomes"),
            &["status"],
        )
        .unwrap();
        registry
            .register(Box::new(merge_outcomes_total.clone()))
            .unwrap();

        let notification_failures_total = IntCounter::new(
            "notification_failures_total",
            "Total completion notifications that failed or were rejected",
        )
        .unwrap();
        registry
            .register(Box::new(notification_failures_total.clone()))
            .unwrap();

        Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            ingest_requests_total,
            ingest_request_duration_seconds,
            upload_admission_rejected_total,
            active_sessions,
            writer_pool_queue_depth,
            writer_pool_overflow_total,
            merge_queue_depth,
            merge_duration_seconds,
            merge_outcomes_total,
            notification_failures_total,
        }
    }
}

/// Classify a request path into a bounded operation label, avoiding
/// high-cardinality labels from raw upload ids.
pub fn classify_endpoint(method: &str, path: &str) -> &'static str {
    match path {
        "/health" => return "health",
        "/metrics" => return "metrics",
        "/uploads/videos" => return "init_video",
        "/uploads/files" => return "init_material",
        _ => {}
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (method, segments.as_slice()) {
        ("PUT", ["uploads", _, "parts", _]) => "upload_part",
        ("GET", ["uploads", _, "parts"]) => "list_parts",
        ("POST", ["uploads", _, "complete"]) => "complete",
        ("GET", ["uploads", _, "status"]) => "status",
        ("DELETE", ["files", _, "video"]) => "delete_video",
        ("DELETE", ["files", _, "materials", _]) => "delete_material",
        ("DELETE", ["files", _]) => "delete_lesson",
        _ => "unknown",
    }
}

/// Running counters shared with the writer pool and merge queue so the
/// `/metrics` handler can read current depths without touching their
/// internal channels.
#[derive(Default)]
pub struct LiveGauges {
    writer_queue_depth: AtomicI64,
    merge_queue_depth: AtomicI64,
    active_sessions: AtomicI64,
}

impl LiveGauges {
    pub fn set_writer_queue_depth(&self, v: i64) {
        self.writer_queue_depth.store(v, Ordering::Relaxed);
    }

    pub fn set_merge_queue_depth(&self, v: i64) {
        self.merge_queue_depth.store(v, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, v: i64) {
        self.active_sessions.store(v, Ordering::Relaxed);
    }

    pub fn writer_queue_depth(&self) -> i64 {
        self.writer_queue_depth.load(Ordering::Relaxed)
    }

    pub fn merge_queue_depth(&self) -> i64 {
        self.merge_queue_depth.load(Ordering::Relaxed)
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => return next.run(request).await,
    };

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = classify_endpoint(&method, &path);

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    metrics
        .ingest_requests_total
        .with_label_values(&[endpoint, &status])
        .inc();
    metrics
        .ingest_request_duration_seconds
        .with_label_values(&[endpoint])
        .observe(duration);

    response
}

/// Handler for GET /metrics — returns Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => {
            return (StatusCode::NOT_FOUND, "Metrics not enabled").into_response();
        }
    };

    metrics
        .writer_pool_queue_depth
        .set(state.live_gauges.writer_queue_depth() as f64);
    metrics
        .merge_queue_depth
        .set(state.live_gauges.merge_queue_depth() as f64);
    metrics
        .active_sessions
        .set(state.live_gauges.active_sessions() as f64);

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_endpoint_covers_the_ingress_routes() {
        assert_eq!(classify_endpoint("GET", "/health"), "health");
        assert_eq!(classify_endpoint("GET", "/metrics"), "metrics");
        assert_eq!(classify_endpoint("POST", "/uploads/videos"), "init_video");
        assert_eq!(classify_endpoint("POST", "/uploads/files"), "init_material");
        assert_eq!(
            classify_endpoint("PUT", "/uploads/abc123/parts/4"),
            "upload_part"
        );
        assert_eq!(
            classify_endpoint("GET", "/uploads/abc123/parts"),
            "list_parts"
        );
        assert_eq!(
            classify_endpoint("POST", "/uploads/abc123/complete"),
            "complete"
        );
        assert_eq!(classify_endpoint("GET", "/uploads/abc123/status"), "status");
        assert_eq!(
            classify_endpoint("DELETE", "/files/l1/video"),
            "delete_video"
        );
        assert_eq!(
            classify_endpoint("DELETE", "/files/l1/materials/m1"),
            "delete_material"
        );
        assert_eq!(classify_endpoint("DELETE", "/files/l1"), "delete_lesson");
    }
}
