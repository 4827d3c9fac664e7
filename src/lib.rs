//! Periscope: self-hosted OpenTelemetry collection panel
//!
//! Accepts OTLP trace, metric, and log exports over HTTP, persists them
//! with a 14-day TTL behind a pluggable store, and fans newly-ingested
//! telemetry out to connected WebSocket viewers in real time. A structured
//! query surface rebuilds filterable views (traces by resource, logs by
//! severity/date/text, latency percentiles from histograms) from the stored
//! OTLP trees.
//!
//! # Pipeline
//!
//! ```text
//! exporter -> POST /v1/{traces,metrics,logs} -> decode -> store (TTL'd)
//!                                                      -> broadcast hub -> every /ws viewer
//! viewer   -> GET /v1/Get* -> store scan -> query filters -> response
//! ```
//!
//! # Example
//!
//! ```no_run
//! use periscope::api::{run_server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     run_server(ServerConfig::default()).await
//! }
//! ```

pub mod api;
pub mod broadcast;
pub mod otel;
pub mod query;
pub mod storage;

// Re-export commonly used types
pub use api::{run_server, ServerConfig, StoreBackend};
pub use broadcast::{BroadcastHub, SignalKind};
pub use otel::{LogsData, MetricsData, TracesData};
pub use storage::{DocumentStore, MemoryStore, StoreError, TelemetryStore};
