use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_log, get_logs, get_metrics, get_trace, get_traces, health_check, ingest_logs,
    ingest_metrics, ingest_traces, AppState,
};
use crate::broadcast::{ws_handler, BroadcastHub};
use crate::storage::{DocumentStore, ExpiryWorker, MemoryStore, TelemetryStore};

/// Which store backend to run on, selected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Fast ephemeral cache; everything is gone on restart.
    Memory,
    /// Durable document store on disk.
    Document { path: PathBuf },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            backend: StoreBackend::Memory,
            sweep_interval_secs: 60,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // OTLP ingestion
        .route("/v1/traces", post(ingest_traces))
        .route("/v1/metrics", post(ingest_metrics))
        .route("/v1/logs", post(ingest_logs))
        // Stored telemetry queries
        .route("/v1/GetTraces", get(get_traces))
        .route("/v1/GetTrace", get(get_trace))
        .route("/v1/GetMetrics", get(get_metrics))
        .route("/v1/GetLogs", get(get_logs))
        .route("/v1/GetLog", get(get_log))
        // Live viewer channel
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the selected store backend
    let store: Arc<dyn TelemetryStore> = match &config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Document { path } => {
            tracing::info!("using document store at {}", path.display());
            Arc::new(DocumentStore::connect(path).await?)
        }
    };

    let hub = Arc::new(BroadcastHub::new());
    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
    });

    // Start the TTL sweeper
    let sweeper = Arc::new(ExpiryWorker::new(
        Arc::clone(&store),
        Duration::from_secs(config.sweep_interval_secs),
    ));
    let sweeper_handle = Arc::clone(&sweeper).start();

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("starting Periscope server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweeper, Arc::clone(&hub)))
        .await?;

    sweeper_handle.abort();

    tracing::info!("Periscope server stopped");
    Ok(())
}

async fn shutdown_signal(sweeper: Arc<ExpiryWorker>, hub: Arc<BroadcastHub>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("shutdown signal received, draining viewers and stopping workers...");
    sweeper.stop();
    // dropping every subscription ends each connection's forward loop
    hub.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use prost::Message;
    use tower::util::ServiceExt;

    use crate::otel::decode::MAX_BODY_BYTES;
    use crate::otel::proto::{
        string_kv, AnyValue, LogRecord, LogsData, Resource, ResourceLogs, ResourceSpans,
        ScopeLogs, ScopeSpans, Span, TracesData,
    };

    fn test_state() -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState {
            store: store.clone(),
            hub: Arc::new(BroadcastHub::new()),
        });
        (store, state)
    }

    fn traces_export(service: &str, trace_id: u8) -> TracesData {
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_kv("service.name", service)],
                    dropped_attributes_count: 0,
                }),
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![Span {
                        trace_id: vec![trace_id; 16],
                        span_id: vec![0x01; 8],
                        name: "GET /".to_string(),
                        start_time_unix_nano: 1_700_000_000_000_000_000,
                        end_time_unix_nano: 1_700_000_000_050_000_000,
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn logs_export(trace_id: u8, body: &str) -> LogsData {
        LogsData {
            resource_logs: vec![ResourceLogs {
                resource: Some(Resource {
                    attributes: vec![string_kv("service.name", "api")],
                    dropped_attributes_count: 0,
                }),
                scope_logs: vec![ScopeLogs {
                    scope: None,
                    log_records: vec![LogRecord {
                        time_unix_nano: 1_700_000_000_000_000_000,
                        severity_number: 9,
                        severity_text: "Information".to_string(),
                        body: Some(AnyValue {
                            string_value: Some(body.to_string()),
                            ..Default::default()
                        }),
                        trace_id: vec![trace_id; 16],
                        span_id: vec![0x02; 8],
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn protobuf_post(path: &str, payload: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/x-protobuf")
            .body(Body::from(payload))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ingest_and_list_traces() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(protobuf_post(
                "/v1/traces",
                traces_export("checkout", 0xaa).encode_to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/GetTraces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listed: Vec<ResourceSpans> =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_get_trace_merges_spans_and_404s_when_absent() {
        let (_, state) = test_state();
        let app = build_router(state);

        // the same trace id exported twice lands under two uniquified keys
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(protobuf_post(
                    "/v1/traces",
                    traces_export("checkout", 0xbb).encode_to_vec(),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let trace_id = "bb".repeat(16);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/GetTrace?traceId={trace_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let merged: TracesData = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(merged.resource_spans.len(), 2);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/GetTrace?traceId=ffffffffffffffffffffffffffffffff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_log_reingestion_merges_under_one_trace() {
        let (store, state) = test_state();
        let app = build_router(state);

        for body in ["first", "second"] {
            let response = app
                .clone()
                .oneshot(protobuf_post(
                    "/v1/logs",
                    logs_export(0xcc, body).encode_to_vec(),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(store.len(), 1);

        let trace_id = "cc".repeat(16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/GetLog?traceId={trace_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let merged: LogsData = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(merged.resource_logs.len(), 2);
    }

    #[tokio::test]
    async fn test_get_log_unknown_trace_is_404() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/GetLog?traceId=00000000000000000000000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_json_content_type_is_unsupported() {
        let (store, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/traces")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"resourceSpans\":[]}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_and_not_persisted() {
        let (store, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(protobuf_post("/v1/traces", vec![0u8; MAX_BODY_BYTES + 1]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_protobuf_is_400_with_message() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(protobuf_post("/v1/traces", vec![0xff, 0xff, 0xff]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(message.contains("malformed"));
    }

    #[tokio::test]
    async fn test_get_logs_applies_severity_filter() {
        let (_, state) = test_state();
        let app = build_router(state);

        let mut export = logs_export(0xdd, "boom");
        export.resource_logs[0].scope_logs[0].log_records[0].severity_text =
            "Error".to_string();
        let response = app
            .clone()
            .oneshot(protobuf_post("/v1/logs", export.encode_to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(protobuf_post(
                "/v1/logs",
                logs_export(0xee, "fine").encode_to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/GetLogs?severity=Error")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let views: Vec<serde_json::Value> =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0]["body"], "boom");
    }

    #[tokio::test]
    async fn test_malformed_stored_record_does_not_break_listing() {
        let (store, state) = test_state();
        let app = build_router(state);

        store
            .set_value("tracedeadbeef", "not json at all", None)
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(protobuf_post(
                "/v1/traces",
                traces_export("checkout", 0x1f).encode_to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/GetTraces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed: Vec<ResourceSpans> =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listed.len(), 1);
    }
}
