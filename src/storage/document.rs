//! Durable document store backend
//!
//! One JSON document per key in a SQLite table (WAL mode). Expiry rides an
//! indexed `expires_at` column: reads filter it out immediately, the
//! background sweep deletes it for good. Schema and index creation is an
//! idempotent lazy check, safe to race across concurrent startups.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;

use super::{log_key, merge_log_json, now_ms, StoreError, TelemetryStore, TELEMETRY_TTL};

pub struct DocumentStore {
    pool: SqlitePool,
    /// Per-key locks serializing the log read-merge-write.
    log_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DocumentStore {
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS telemetry ( \
                key TEXT PRIMARY KEY, \
                value TEXT NOT NULL, \
                expires_at INTEGER \
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS telemetry_expires_at ON telemetry (expires_at)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            log_locks: DashMap::new(),
        })
    }

    fn log_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.log_locks.entry(key.to_string()).or_default().clone()
    }
}

#[async_trait]
impl TelemetryStore for DocumentStore {
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl.map(|t| now_ms() + t.as_millis() as i64);
        sqlx::query(
            "INSERT INTO telemetry (key, value, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM telemetry \
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let values: Vec<String> = sqlx::query_scalar(
            "SELECT value FROM telemetry \
             WHERE instr(key, ?1) > 0 AND (expires_at IS NULL OR expires_at > ?2) \
             ORDER BY key",
        )
        .bind(pattern)
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM telemetry WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM telemetry WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn save_log(&self, log_json: &str, trace_id: &str) -> Result<(), StoreError> {
        let key = log_key(trace_id);
        let lock = self.log_lock(&key);
        let _guard = lock.lock().await;

        let existing = self.get_value(&key).await?;
        let merged = merge_log_json(existing.as_deref(), log_json);
        self.set_value(&key, &merged, Some(TELEMETRY_TTL)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> DocumentStore {
        DocumentStore::connect(&dir.path().join("telemetry.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn kv_round_trip() {
        let dir = TempDir::new().unwrap();
        contract::kv_round_trip(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn scan_substring_semantics() {
        let dir = TempDir::new().unwrap();
        contract::scan_substring_semantics(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let dir = TempDir::new().unwrap();
        contract::ttl_expiry(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn log_upsert_converges_on_one_record() {
        let dir = TempDir::new().unwrap();
        contract::log_upsert_converges_on_one_record(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn trace_writes_do_not_collide() {
        let dir = TempDir::new().unwrap();
        contract::trace_writes_do_not_collide(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn metrics_write_is_mirrored() {
        let dir = TempDir::new().unwrap();
        contract::metrics_write_is_mirrored(&open(&dir).await).await;
    }

    #[tokio::test]
    async fn schema_setup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = open(&dir).await;
        first.set_value("meta", "v", None).await.unwrap();
        drop(first);

        // a second startup over the same file must tolerate the existing
        // table and index, and see the data
        let second = open(&dir).await;
        assert_eq!(second.get_value("meta").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store
                .save_log("{\"resourceLogs\":[]}", &"0b".repeat(16))
                .await
                .unwrap();
        }
        let store = open(&dir).await;
        assert_eq!(store.scan_by_pattern("log").await.unwrap().len(), 1);
    }
}
