//! Telemetry store abstraction
//!
//! One key/value contract with pattern scans and TTL expiry, behind two
//! interchangeable backends: [`MemoryStore`] (fast, ephemeral) and
//! [`DocumentStore`] (durable, SQLite-backed). Every telemetry record is
//! addressed by a record-type prefix plus a correlating id and expires 14
//! days after write; removal is lazy or swept in the background, never
//! guaranteed at the expiry instant.

pub mod document;
pub mod memory;
pub mod ttl;

pub use document::DocumentStore;
pub use memory::MemoryStore;
pub use ttl::ExpiryWorker;

use std::time::Duration;

use async_trait::async_trait;

use crate::otel::proto::LogsData;

/// Uniform retention for all telemetry records.
pub const TELEMETRY_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

pub const TRACE_KEY_PREFIX: &str = "trace";
pub const LOG_KEY_PREFIX: &str = "log";
pub const METRICS_KEY_PREFIX: &str = "metrics";

/// `trace{traceId}{uniquifier}`: spans of one trace arrive across several
/// exports and must not overwrite each other.
pub fn trace_key(trace_id: &str, uniquifier: &str) -> String {
    format!("{TRACE_KEY_PREFIX}{trace_id}{uniquifier}")
}

/// `log{traceId}`: one merged record per trace.
pub fn log_key(trace_id: &str) -> String {
    format!("{LOG_KEY_PREFIX}{trace_id}")
}

/// `metrics{service}{route}`.
pub fn metrics_key(service: &str, route: &str) -> String {
    format!("{METRICS_KEY_PREFIX}{service}{route}")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Merge an incoming logs export into the stored record for the same trace:
/// resource logs are appended so late-arriving exports converge on one
/// record. A stored value that no longer parses is replaced outright rather
/// than poisoning the key.
pub(crate) fn merge_log_json(existing: Option<&str>, incoming: &str) -> String {
    let Some(mut stored) =
        existing.and_then(|raw| serde_json::from_str::<LogsData>(raw).ok())
    else {
        return incoming.to_string();
    };
    let Ok(new_root) = serde_json::from_str::<LogsData>(incoming) else {
        return incoming.to_string();
    };

    stored.resource_logs.extend(new_root.resource_logs);
    serde_json::to_string(&stored).unwrap_or_else(|_| incoming.to_string())
}

/// Backend-neutral store contract. Both implementations must behave
/// identically from the caller's side; the contract test suite runs against
/// each.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Upsert `value` under the exact `key`. A `ttl` makes the record
    /// eligible for removal strictly after that duration; `None` means no
    /// expiry (metadata).
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Values (not keys) of every record whose key *contains* `pattern`,
    /// in an order that is stable within one call.
    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Best-effort delete; an absent key is not an error.
    async fn remove_key(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired records, returning how many went away.
    async fn sweep_expired(&self) -> Result<u64, StoreError>;

    /// Persist one trace export under a uniquified key.
    async fn save_trace(&self, trace_json: &str, trace_id: &str) -> Result<(), StoreError> {
        let uniquifier: u32 = rand::random();
        let key = trace_key(trace_id, &format!("{uniquifier:08x}"));
        self.set_value(&key, trace_json, Some(TELEMETRY_TTL)).await
    }

    /// Merge one logs export into the trace's record. Implementations must
    /// serialize the read-merge-write per key: two racing exports for the
    /// same trace may not lose either's records.
    async fn save_log(&self, log_json: &str, trace_id: &str) -> Result<(), StoreError>;

    /// Persist one metrics export under its service/route key and mirror it
    /// under the bare `metrics` key for the all-metrics scan.
    async fn save_metrics(
        &self,
        metrics_json: &str,
        service: &str,
        route: &str,
    ) -> Result<(), StoreError> {
        self.set_value(&metrics_key(service, route), metrics_json, Some(TELEMETRY_TTL))
            .await?;
        self.set_value(METRICS_KEY_PREFIX, metrics_json, Some(TELEMETRY_TTL))
            .await
    }
}
