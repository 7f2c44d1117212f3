//! Battle engine boundary
//!
//! The engine owns the rules. The orchestrator only sees three channels per
//! match: one request/command pair for each side and an omniscient stream of
//! raw protocol chunks.

pub mod mock;
pub mod showdown;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::battle::{AgentIdentity, Command, SideRequest};

pub use mock::{MockEngine, MockMatch, MockSide};
pub use showdown::ShowdownEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Simulator binary not found: {0}")]
    BinaryNotFound(String),
    #[error("Failed to spawn simulator process: {0}")]
    ProcessSpawnFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Engine channel closed")]
    ChannelClosed,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Message on a side's request channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    Request(SideRequest),
    /// Engine complaint about the last command, e.g. `[Unavailable choice] ...`
    Error(String),
}

impl EngineMessage {
    /// A submitted command was rejected after the fact; a corrected request follows
    pub fn is_unavailable_choice(&self) -> bool {
        matches!(self, EngineMessage::Error(msg) if msg.contains("[Unavailable choice]"))
    }
}

/// One side's request/response channel
pub struct SideChannel {
    pub requests: mpsc::Receiver<EngineMessage>,
    pub commands: mpsc::Sender<Command>,
}

impl SideChannel {
    pub fn new(
        requests: mpsc::Receiver<EngineMessage>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self { requests, commands }
    }
}

/// Out-of-band control over a running match
#[async_trait]
pub trait EngineController: Send + Sync {
    /// Resolve the match immediately as a tie
    async fn force_tie(&self) -> Result<(), EngineError>;

    /// Release engine resources once the session is over
    fn shutdown(&self) {}
}

/// Channels for a freshly started match
pub struct EngineHandle {
    pub p1: SideChannel,
    pub p2: SideChannel,
    /// Every protocol chunk, secrets included
    pub omniscient: mpsc::Receiver<String>,
    pub controller: Arc<dyn EngineController>,
}

/// Trait for engines that can host a match
#[async_trait]
pub trait BattleEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Check if the engine can be started
    fn is_available(&self) -> bool {
        true
    }

    /// Start a match between two agents
    async fn start_match(
        &self,
        format: &str,
        p1: &AgentIdentity,
        p2: &AgentIdentity,
    ) -> Result<EngineHandle, EngineError>;
}
