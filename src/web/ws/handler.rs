//! WebSocket connection handler for battle observers.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::battle::BattleGate;

use super::messages::{ClientMessage, ServerMessage};

/// Serve one observer until either side closes.
///
/// The observer subscribes before its snapshot is captured, so every event
/// published after the snapshot is delivered. Protocol updates it already
/// holds carry a `seq` below the snapshot's log length.
pub async fn handle_websocket(socket: WebSocket, gate: BattleGate) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut events = gate.subscribe();
    let snapshot = gate.status();
    tracing::debug!(observers = snapshot.observers, "Observer connected");
    if tx.send(ServerMessage::Snapshot { snapshot }).await.is_err() {
        send_task.abort();
        return;
    }

    let event_tx = tx.clone();
    let event_gate = gate.clone();
    let event_task = tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(event) => ServerMessage::Event { event },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Observer lagged, resending snapshot");
                    ServerMessage::Snapshot {
                        snapshot: event_gate.status(),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if event_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // Pings are handled automatically by axum
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket error");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&msg) {
            Ok(ClientMessage::Ping) => ServerMessage::Pong,
            Ok(ClientMessage::Status) => ServerMessage::Snapshot {
                snapshot: gate.status(),
            },
            Err(e) => ServerMessage::error(format!("Invalid message: {}", e)),
        };
        if let Err(send_err) = tx.send(reply).await {
            tracing::debug!(error = ?send_err, "Failed to send reply");
            break;
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::debug!("Observer disconnected");
}
