use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum::http::HeaderMap;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::broadcast::{BroadcastHub, SignalKind};
use crate::otel::decode::{decode_export, DecodeError};
use crate::otel::proto::{LogsData, MetricsData, ResourceSpans, TracesData};
use crate::query::logs::log_trace_id_hex;
use crate::query::{
    filter_logs, filter_traces, paginate, service_and_route, trace_id_hex, LogFilter, LogView,
    TraceFilter,
};
use crate::storage::{
    log_key, StoreError, TelemetryStore, LOG_KEY_PREFIX, METRICS_KEY_PREFIX, TRACE_KEY_PREFIX,
};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub hub: Arc<BroadcastHub>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Ingestion
// ============================================================================

/// Endpoint: POST /v1/traces
pub async fn ingest_traces(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let root: TracesData = decode_export(&headers, body).await?;
    let trace_id = trace_id_hex(&root)
        .ok_or_else(|| ApiError::BadRequest("trace export contains no spans".to_string()))?;

    let json = serde_json::to_string(&root)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    state.store.save_trace(&json, &trace_id).await?;
    state.hub.publish(SignalKind::Traces, &json);

    Ok(StatusCode::OK)
}

/// Endpoint: POST /v1/metrics
pub async fn ingest_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let root: MetricsData = decode_export(&headers, body).await?;
    let (service, route) = service_and_route(&root);

    let json = serde_json::to_string(&root)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    state.store.save_metrics(&json, &service, &route).await?;
    state.hub.publish(SignalKind::Metrics, &json);

    Ok(StatusCode::OK)
}

/// Endpoint: POST /v1/logs
pub async fn ingest_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let root: LogsData = decode_export(&headers, body).await?;
    let trace_id = log_trace_id_hex(&root)
        .ok_or_else(|| ApiError::BadRequest("log export contains no records".to_string()))?;

    let json = serde_json::to_string(&root)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    state.store.save_log(&json, &trace_id).await?;
    state.hub.publish(SignalKind::Logs, &json);

    Ok(StatusCode::OK)
}

// ============================================================================
// Queries
// ============================================================================

/// Decode scanned values, skipping any record that no longer parses: one bad
/// historical record must not take the whole listing down.
fn decode_stored<T: DeserializeOwned>(values: Vec<String>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_str(&value) {
            Ok(root) => Some(root),
            Err(err) => {
                tracing::warn!("skipping malformed stored record: {}", err);
                None
            }
        })
        .collect()
}

fn default_all() -> String {
    "all".to_string()
}

fn default_page() -> usize {
    1
}

#[derive(Deserialize)]
pub struct TracesParams {
    #[serde(default = "default_all")]
    pub resource: String,
    #[serde(default, rename = "routesOnly")]
    pub routes_only: bool,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default, rename = "pageSize")]
    pub page_size: usize,
}

/// Endpoint: GET /v1/GetTraces
pub async fn get_traces(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TracesParams>,
) -> Result<Json<Vec<ResourceSpans>>, ApiError> {
    let values = state.store.scan_by_pattern(TRACE_KEY_PREFIX).await?;
    let roots = decode_stored::<TracesData>(values);
    let filter = TraceFilter {
        resource: params.resource,
        routes_only: params.routes_only,
    };
    let listing = filter_traces(roots, &filter);
    Ok(Json(paginate(listing, params.page, params.page_size)))
}

#[derive(Deserialize)]
pub struct TraceIdParams {
    #[serde(rename = "traceId")]
    pub trace_id: String,
}

/// Endpoint: GET /v1/GetTrace
///
/// Spans of one trace live under several uniquified keys; the lookup merges
/// them back into a single root.
pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TraceIdParams>,
) -> Result<Json<TracesData>, ApiError> {
    let pattern = format!("{TRACE_KEY_PREFIX}{}", params.trace_id);
    let values = state.store.scan_by_pattern(&pattern).await?;

    let mut merged = TracesData::default();
    for root in decode_stored::<TracesData>(values) {
        merged.resource_spans.extend(root.resource_spans);
    }
    if merged.resource_spans.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no trace stored under id {}",
            params.trace_id
        )));
    }
    Ok(Json(merged))
}

/// Endpoint: GET /v1/GetMetrics
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MetricsData>>, ApiError> {
    let values = state.store.scan_by_pattern(METRICS_KEY_PREFIX).await?;
    Ok(Json(decode_stored::<MetricsData>(values)))
}

#[derive(Deserialize)]
pub struct LogsParams {
    #[serde(default = "default_all")]
    pub resource: String,
    #[serde(default = "default_all")]
    pub severity: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, rename = "utcOffset")]
    pub utc_offset: i32,
    #[serde(default)]
    pub ascending: bool,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default, rename = "pageSize")]
    pub page_size: usize,
}

/// Endpoint: GET /v1/GetLogs
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<LogView>>, ApiError> {
    let values = state.store.scan_by_pattern(LOG_KEY_PREFIX).await?;
    let roots = decode_stored::<LogsData>(values);
    let filter = LogFilter {
        resource: params.resource,
        severity: params.severity,
        search: params.filter,
        date: params.date,
        utc_offset_hours: params.utc_offset,
        ascending: params.ascending,
    };
    let listing = filter_logs(&roots, &filter);
    Ok(Json(paginate(listing, params.page, params.page_size)))
}

/// Endpoint: GET /v1/GetLog
pub async fn get_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TraceIdParams>,
) -> Result<Json<LogsData>, ApiError> {
    let not_found = || ApiError::NotFound(format!("no logs stored for trace {}", params.trace_id));

    let value = state
        .store
        .get_value(&log_key(&params.trace_id))
        .await?
        .ok_or_else(not_found)?;
    // a record that no longer parses is treated as absent
    let root: LogsData = serde_json::from_str(&value).map_err(|_| not_found())?;
    Ok(Json(root))
}

// ============================================================================
// Error Handling
// ============================================================================

/// Everything an endpoint can fail with. Decode and store failures surface
/// as 4xx with the message as plain text; nothing here maps to a 500.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnsupportedMediaType(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, message).into_response()
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedContentType(_) => {
                ApiError::UnsupportedMediaType(err.to_string())
            }
            DecodeError::TooLarge | DecodeError::Canceled(_) | DecodeError::Malformed(_) => {
                ApiError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
