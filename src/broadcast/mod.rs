//! Real-time fan-out of newly-ingested telemetry to connected viewers

pub mod hub;
pub mod ws;

pub use hub::{BroadcastHub, SignalKind};
pub use ws::ws_handler;
