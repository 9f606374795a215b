//! Realtime channel: each WebSocket connection is bound to the live
//! backend's change stream for server-initiated push.

use crate::backend::ChangeEvent;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;

async fn realtime(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.db.subscribe();
    ws.on_upgrade(move |socket| forward_changes(socket, rx))
}

async fn forward_changes(socket: WebSocket, mut rx: broadcast::Receiver<ChangeEvent>) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(ev) => {
                    let Ok(text) = serde_json::to_string(&ev) else { continue };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "realtime client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // channel is push-only; client frames other than close are ignored
                Some(Ok(_)) => {}
            },
        }
    }
}

pub fn realtime_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/realtime", get(realtime))
        .with_state(state)
}
