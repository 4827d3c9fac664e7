//! OpenTelemetry wire support for Periscope
//!
//! Provides the OTLP protobuf decode path and the typed telemetry roots.
//!
//! ## Ingest
//!
//! Point any OTLP/HTTP exporter at the panel:
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:8080
//! OTEL_EXPORTER_OTLP_PROTOCOL=http/protobuf
//! ```
//!
//! Or configure an OTel Collector to forward:
//! ```yaml
//! exporters:
//!   otlphttp:
//!     endpoint: http://periscope:8080
//! ```

pub mod decode;
pub mod proto;

pub use decode::{decode_export, DecodeError, MAX_BODY_BYTES};
pub use proto::{LogsData, MetricsData, TracesData};
