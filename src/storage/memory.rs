//! In-memory store backend
//!
//! The fast ephemeral cache variant: a concurrent map with per-key expiry.
//! Expired entries disappear lazily on read and are collected by the
//! periodic sweep.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{log_key, merge_log_json, now_ms, StoreError, TelemetryStore, TELEMETRY_TTL};

#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at_ms: Option<i64>,
}

impl Record {
    fn expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map(|at| at <= now_ms).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at_ms: ttl.map(|t| now_ms() + t.as_millis() as i64),
            },
        );
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        let expired = match self.records.get(key) {
            Some(record) if !record.expired(now) => return Ok(Some(record.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove(key);
        }
        Ok(None)
    }

    async fn scan_by_pattern(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let mut hits: Vec<(String, String)> = self
            .records
            .iter()
            .filter(|entry| entry.key().contains(pattern) && !entry.value().expired(now))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect();
        // the map iterates in arbitrary order; key order keeps one scan stable
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits.into_iter().map(|(_, value)| value).collect())
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = now_ms();
        let before = self.records.len();
        self.records.retain(|_, record| !record.expired(now));
        // inserts may land mid-sweep; the count is best-effort
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn save_log(&self, log_json: &str, trace_id: &str) -> Result<(), StoreError> {
        let expires_at_ms = Some(now_ms() + TELEMETRY_TTL.as_millis() as i64);
        // the entry guard serializes read-merge-write for this key
        match self.records.entry(log_key(trace_id)) {
            MapEntry::Occupied(mut occupied) => {
                let merged = merge_log_json(Some(&occupied.get().value), log_json);
                occupied.insert(Record {
                    value: merged,
                    expires_at_ms,
                });
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Record {
                    value: log_json.to_string(),
                    expires_at_ms,
                });
            }
        }
        Ok(())
    }
}
