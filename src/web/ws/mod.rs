//! Observer WebSocket.

mod handler;
mod messages;

pub use handler::handle_websocket;
pub use messages::{ClientMessage, ServerMessage};
