//! Event fan-out to observers
//!
//! Every lifecycle event goes through one `tokio::sync::broadcast` channel.
//! Observers that connect late (or ask explicitly) get an [`ObserverSnapshot`]
//! carrying the whole protocol log so far, which they replay locally.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::session::BattleSession;
use super::state::{AgentIdentity, BattleStatus, EndReason, Outcome, Side};

/// Default number of buffered events per observer
pub const DEFAULT_EVENT_BUFFER: usize = 512;

/// Events pushed to every connected observer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    /// Sent once the first switch-in makes the match renderable
    SessionStarted {
        battle_id: Uuid,
        format: String,
        p1: AgentIdentity,
        p2: AgentIdentity,
        turn: u32,
        /// Protocol log captured up to the ready point
        log: Vec<String>,
    },
    ProtocolUpdate {
        battle_id: Uuid,
        /// Index of this chunk in the session's protocol log
        seq: usize,
        chunk: String,
    },
    Thinking {
        battle_id: Uuid,
        side: Side,
        turn: u32,
        started_at: DateTime<Utc>,
    },
    /// Incremental reasoning; each request ends with one `done: true` marker
    ReasoningChunk {
        battle_id: Uuid,
        side: Side,
        chunk: String,
        done: bool,
    },
    Decision {
        battle_id: Uuid,
        side: Side,
        turn: u32,
        command: String,
        reasoning: Option<String>,
        latency_ms: u64,
        fallback: bool,
    },
    SessionEnded {
        battle_id: Uuid,
        outcome: Option<Outcome>,
        winner: Option<AgentIdentity>,
        reason: EndReason,
        turn: u32,
    },
}

impl BattleEvent {
    pub fn event_type_name(&self) -> &'static str {
        match self {
            BattleEvent::SessionStarted { .. } => "session_started",
            BattleEvent::ProtocolUpdate { .. } => "protocol_update",
            BattleEvent::Thinking { .. } => "thinking",
            BattleEvent::ReasoningChunk { .. } => "reasoning_chunk",
            BattleEvent::Decision { .. } => "decision",
            BattleEvent::SessionEnded { .. } => "session_ended",
        }
    }

    pub fn battle_id(&self) -> Uuid {
        match self {
            BattleEvent::SessionStarted { battle_id, .. }
            | BattleEvent::ProtocolUpdate { battle_id, .. }
            | BattleEvent::Thinking { battle_id, .. }
            | BattleEvent::ReasoningChunk { battle_id, .. }
            | BattleEvent::Decision { battle_id, .. }
            | BattleEvent::SessionEnded { battle_id, .. } => *battle_id,
        }
    }
}

/// Everything an observer needs to rebuild the match from scratch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObserverSnapshot {
    pub active: bool,
    pub battle_id: Option<Uuid>,
    pub status: Option<BattleStatus>,
    pub format: Option<String>,
    pub turn: u32,
    pub p1: Option<AgentIdentity>,
    pub p2: Option<AgentIdentity>,
    pub outcome: Option<Outcome>,
    pub winner: Option<AgentIdentity>,
    pub observers: usize,
    pub log: Vec<String>,
}

impl ObserverSnapshot {
    /// Snapshot of the current session, or an idle snapshot when there is none
    pub fn capture(session: Option<&BattleSession>, observers: usize) -> Self {
        let Some(session) = session else {
            return Self {
                active: false,
                battle_id: None,
                status: None,
                format: None,
                turn: 0,
                p1: None,
                p2: None,
                outcome: None,
                winner: None,
                observers,
                log: Vec::new(),
            };
        };

        let status = session.status();
        let outcome = session.outcome();
        Self {
            active: status.is_live(),
            battle_id: Some(session.id),
            status: Some(status),
            format: Some(session.format.clone()),
            turn: session.turn(),
            p1: Some(session.identity(Side::P1).clone()),
            p2: Some(session.identity(Side::P2).clone()),
            outcome,
            winner: outcome
                .and_then(|o| o.winner())
                .map(|side| session.identity(side).clone()),
            observers,
            log: session.log(),
        }
    }
}

/// Publish/subscribe channel owned by the fan-out
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<BattleEvent>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push an event to all observers; returns how many received it
    pub fn publish(&self, event: BattleEvent) -> usize {
        let event_type = event.event_type_name();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event_type, "No observers for battle event");
                0
            }
        }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<BattleEvent> {
        self.tx.subscribe()
    }

    /// Live observer count, derived from open subscriptions
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
