//! `/events` websocket endpoint.
//!
//! Protocol: the client sends one JSON object
//! `{"subscribe": ["Text", "DraftEnd", ...]}` drawn from the known class
//! set (plus the `all` / `all_but_chunks` aliases), then the server streams
//! one JSON event per message. An empty or invalid subscription closes the
//! socket with code 1003.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::AppState;

const INVALID_SUBSCRIPTION: u16 = 1003;

#[derive(Deserialize)]
struct SubscribeMessage {
    #[serde(default)]
    subscribe: Vec<String>,
}

pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_ws(socket, state))
}

async fn handle_events_ws(mut socket: WebSocket, state: AppState) {
    // First message must be the subscription.
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let classes = serde_json::from_str::<SubscribeMessage>(&request)
        .map_err(|e| e.to_string())
        .and_then(|m| {
            scrive_events::expand_subscription(&m.subscribe).map_err(|e| e.to_string())
        });
    let classes = match classes {
        Ok(classes) => classes,
        Err(reason) => {
            tracing::warn!(%reason, "rejecting event subscription");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: INVALID_SUBSCRIPTION,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    let (id, mut queue) = state.events.register(classes);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            payload = queue.recv() => {
                let Some(payload) = payload else { break };
                if sink.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    // Clients only ever send the initial subscription;
                    // anything but keepalive means they are done.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.events.unregister(id);
}
