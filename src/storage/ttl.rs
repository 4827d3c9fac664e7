use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::TelemetryStore;

/// Background worker that periodically sweeps expired telemetry out of the
/// store.
pub struct ExpiryWorker {
    store: Arc<dyn TelemetryStore>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExpiryWorker {
    pub fn new(store: Arc<dyn TelemetryStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("expiry worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                match self.store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::info!("expiry worker removed {} records", removed);
                    }
                    Err(err) => {
                        tracing::warn!("expiry sweep failed: {}", err);
                    }
                }
            }

            tracing::info!("expiry worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
