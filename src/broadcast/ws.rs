//! WebSocket endpoint for live viewers

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use super::hub::BroadcastHub;
use crate::api::handlers::AppState;

/// A viewer that cannot take a frame within this window is dropped so one
/// slow consumer cannot stall its own backlog forever.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint: GET /ws
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Drive one viewer connection: forward published envelopes out, watch the
/// peer for a close frame or fault. Every exit path unsubscribes.
async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (id, mut feed) = hub.subscribe();
    tracing::debug!(subscriber = id, "viewer connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            envelope = feed.recv() => {
                match envelope {
                    Some(text) => {
                        let send = sink.send(Message::Text(text.to_string()));
                        match tokio::time::timeout(SEND_TIMEOUT, send).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => break,
                        }
                    }
                    // hub shut down; close our side
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // no client->server contract beyond the close handshake
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unsubscribe(id);
    tracing::debug!(subscriber = id, "viewer disconnected");
}
