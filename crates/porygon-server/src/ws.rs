//! Progress stream over WebSocket

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::AppState;
use porygon_sync::ProgressBroadcaster;

/// Upgrade to a WebSocket that receives every progress envelope
pub async fn progress_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let broadcaster = state.broadcaster().clone();
    let shutdown = state.supervisor.shutdown_token();
    ws.on_upgrade(move |socket| observe(socket, broadcaster, shutdown))
}

/// Forward envelopes as JSON text frames until either side goes away
async fn observe(socket: WebSocket, broadcaster: ProgressBroadcaster, shutdown: CancellationToken) {
    let (id, mut progress) = broadcaster.register();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!(observer = %id, "progress observer connected");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }

            envelope = progress.recv() => {
                let Some(envelope) = envelope else { break };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(observer = %id, error = %e, "failed to encode envelope");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    debug!(observer = %id, "send failed");
                    break;
                }
            }

            ws_msg = ws_receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Ping is answered by the protocol layer; anything else is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    broadcaster.unregister(id);
    info!(observer = %id, "progress observer disconnected");
}
