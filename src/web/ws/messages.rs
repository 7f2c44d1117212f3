//! WebSocket message types.

use serde::{Deserialize, Serialize};

use crate::battle::{BattleEvent, ObserverSnapshot};

/// Messages sent by an observer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Ask for a fresh snapshot
    Status,
}

/// Messages sent to an observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { snapshot: ObserverSnapshot },
    Event { event: BattleEvent },
    Pong,
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
