//! WebSocket feed of job snapshots.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use jobline_engine::{JobLifecycle, Subscription};
use tracing::{debug, warn};

/// Creates the WebSocket router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// Upgrades the connection and streams every published snapshot to it.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let subscription = state.engine.subscribe();
    ws.on_upgrade(move |socket| stream_snapshots(socket, subscription))
}

/// Forwards snapshots as JSON text frames until either side goes away.
///
/// Client frames are read only to notice a close.
async fn stream_snapshots(socket: WebSocket, mut subscription: Subscription) {
    let subscriber = subscription.id();
    debug!(subscriber, "WebSocket subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!(subscriber, "Subscription closed by hub");
                    break;
                };
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(subscriber, error = %e, "Failed to encode snapshot");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    debug!(subscriber, "WebSocket subscriber disconnected");
}
