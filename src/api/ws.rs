//! WebSocket event stream.
//!
//! A client first receives `connection_established` and a `status_update`,
//! then every broadcast event. Text frames it sends are parsed as commands
//! and answered with a `command_result` (or an `error` for a bad frame).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::orchestration::{BroadcastEvent, ChannelListener, Command, EventListener};
use crate::runtime::Runtime;

const REPLY_BUFFER: usize = 32;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state.runtime, socket))
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &BroadcastEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!(error = %e, event = event.kind(), "Failed to encode event");
            Ok(())
        }
    }
}

/// Turn one inbound text frame into the reply for that client.
pub(crate) async fn handle_text(runtime: &Runtime, text: &str) -> BroadcastEvent {
    match serde_json::from_str::<Command>(text) {
        Ok(command) => BroadcastEvent::command_result(runtime.execute(command).await),
        Err(e) => BroadcastEvent::error(format!("Invalid command: {e}")),
    }
}

pub async fn handle_connection(runtime: Arc<Runtime>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4().to_string();
    let director = Arc::clone(runtime.director());

    let greeting = [
        BroadcastEvent::ConnectionEstablished {
            client_id: client_id.clone(),
            timestamp: Utc::now(),
        },
        director.status_event(),
    ];
    for event in &greeting {
        if send_event(&mut sender, event).await.is_err() {
            return;
        }
    }

    let (listener, mut events_rx) = ChannelListener::new(director.listener_buffer());
    let listener: Arc<dyn EventListener> = listener;
    director.add_listener(&listener);
    info!(client_id = %client_id, "WebSocket client connected");

    let (reply_tx, mut reply_rx) = mpsc::channel::<BroadcastEvent>(REPLY_BUFFER);

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = reply_rx.recv() => event,
                Some(event) = events_rx.recv() => event,
                else => break,
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    let rt = Arc::clone(&runtime);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_text(&rt, &text).await;
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => {},
        _ = &mut send_task => {},
    }

    director.remove_listener(&listener);
    recv_task.abort();
    send_task.abort();
    info!(client_id = %client_id, "WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::self_healing::metrics::ScriptedMetrics;
    use serde_json::json;

    fn runtime() -> Runtime {
        Runtime::with_parts(
            Config::default(),
            Capabilities::builtin(Arc::new(ScriptedMetrics::constant(5.0, 5.0, 5.0))),
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn test_command_frame_gets_result() {
        let rt = runtime();
        let reply = handle_text(
            &rt,
            r#"{"command_id": "w1", "command_type": "list_agents"}"#,
        )
        .await;
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], json!("command_result"));
        assert_eq!(value["command_id"], json!("w1"));
        assert_eq!(value["result"]["status"], json!("success"));
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let rt = runtime();
        let reply = handle_text(&rt, "not json").await;
        assert_eq!(reply.kind(), "error");
    }
}
