//! WebSocket upgrade and per-connection handler. Serves the collector's cached JSON quickly.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::StreamExt;
use serde_json::json;
use tracing::debug;

use crate::sampler::{publish, take_sample};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Message::Text(text) if text == "get_stats" => {
                // Serve the cached sample; on cold start, sample once.
                let mut js = state.last_json.read().await.clone();
                if js.is_empty() {
                    let fresh = match take_sample(&state).await {
                        Ok(s) => publish(&state, &s).await,
                        Err(e) => Err(e),
                    };
                    js = match fresh {
                        Ok(j) => j,
                        Err(e) => {
                            debug!("ws cold-start sample failed: {e}");
                            json!({ "success": false, "error": e.to_string() }).to_string()
                        }
                    };
                }
                if socket.send(Message::Text(js)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
