//! Fan-out hub for live telemetry
//!
//! Tracks every connected viewer and pushes each newly-ingested root to all
//! of them. Delivery is fire-and-forget from the ingesting caller's side:
//! the envelope is serialized once, handed to every subscriber channel, and
//! a subscriber that is gone gets pruned without disturbing the rest. There
//! is no backlog; a viewer connecting after a publish never sees it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::mpsc;

/// Which signal an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Traces,
    Metrics,
    Logs,
}

/// The wire envelope of the live channel; never persisted.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: SignalKind,
    data: &'a RawValue,
}

pub struct BroadcastHub {
    subscribers: DashMap<u64, mpsc::UnboundedSender<Arc<str>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a viewer connection. The returned receiver yields every
    /// envelope published while the subscription is alive.
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver one root to every open subscriber. Returns how many accepted
    /// the envelope; subscribers whose channel is gone are pruned here.
    pub fn publish(&self, kind: SignalKind, payload_json: &str) -> usize {
        let raw = match RawValue::from_string(payload_json.to_string()) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!("refusing to broadcast non-JSON payload: {}", err);
                return 0;
            }
        };
        let envelope = Envelope { kind, data: &*raw };
        let text: Arc<str> = match serde_json::to_string(&envelope) {
            Ok(text) => text.into(),
            Err(err) => {
                tracing::error!("failed to serialize broadcast envelope: {}", err);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(Arc::clone(&text)).is_ok() {
                delivered += 1;
            } else {
                gone.push(*entry.key());
            }
        }
        for id in gone {
            self.subscribers.remove(&id);
            tracing::debug!(subscriber = id, "pruned dead subscriber");
        }
        delivered
    }

    /// Drop every subscription; each connection's forward loop ends and the
    /// socket closes.
    pub fn shutdown(&self) {
        self.subscribers.clear();
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();

        let delivered = hub.publish(SignalKind::Traces, "{\"resourceSpans\":[]}");
        assert_eq!(delivered, 2);

        let text = rx_a.recv().await.unwrap();
        assert_eq!(&*text, "{\"type\":\"traces\",\"data\":{\"resourceSpans\":[]}}");
        assert_eq!(&*rx_b.recv().await.unwrap(), &*text);
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned_without_blocking_the_rest() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, rx_b) = hub.subscribe();
        let (_c, mut rx_c) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 3);

        // forcibly close the middle connection
        drop(rx_b);

        let delivered = hub.publish(SignalKind::Logs, "{\"resourceLogs\":[]}");
        assert_eq!(delivered, 2);
        assert_eq!(hub.subscriber_count(), 2);

        assert!(rx_a.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let hub = BroadcastHub::new();
        hub.publish(SignalKind::Metrics, "{\"resourceMetrics\":[]}");

        let (_id, mut rx) = hub.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_ends_every_subscription() {
        let hub = BroadcastHub::new();
        let (_a, mut rx) = hub.subscribe();
        hub.shutdown();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn envelope_kind_tags() {
        assert_eq!(serde_json::to_string(&SignalKind::Traces).unwrap(), "\"traces\"");
        assert_eq!(serde_json::to_string(&SignalKind::Metrics).unwrap(), "\"metrics\"");
        assert_eq!(serde_json::to_string(&SignalKind::Logs).unwrap(), "\"logs\"");
    }
}
