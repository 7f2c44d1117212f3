//! Battle session - the single match the gate currently owns

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use uuid::Uuid;

use super::agent::Decision;
use super::results::SideStats;
use super::state::{AgentIdentity, BattleStatus, EndReason, Outcome, Side};

/// Mutable part of a session
#[derive(Debug)]
struct SessionState {
    status: BattleStatus,
    turn: u32,
    outcome: Option<Outcome>,
    end_reason: Option<EndReason>,
    ended_at: Option<DateTime<Utc>>,
    /// Raw protocol chunks, append-only
    log: Vec<String>,
    stats: [SideStats; 2],
    last_decision: [Option<Decision>; 2],
}

/// A battle between two agents
///
/// Status moves `Pending -> Active -> Ended` and never back. The turn number
/// only grows. The protocol log is only ever appended to.
#[derive(Debug)]
pub struct BattleSession {
    /// Unique identifier for this battle
    pub id: Uuid,

    /// Engine format id (e.g. `gen9randombattle`)
    pub format: String,

    p1: AgentIdentity,
    p2: AgentIdentity,

    /// Battle start time
    pub started_at: DateTime<Utc>,

    state: RwLock<SessionState>,

    /// Flips to true on the first switch-in
    ready: watch::Sender<bool>,
}

impl BattleSession {
    /// Create a new pending battle session
    pub fn new(format: impl Into<String>, p1: AgentIdentity, p2: AgentIdentity) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            id: Uuid::now_v7(),
            format: format.into(),
            p1,
            p2,
            started_at: Utc::now(),
            state: RwLock::new(SessionState {
                status: BattleStatus::Pending,
                turn: 0,
                outcome: None,
                end_reason: None,
                ended_at: None,
                log: Vec::new(),
                stats: [SideStats::default(), SideStats::default()],
                last_decision: [None, None],
            }),
            ready,
        }
    }

    pub fn identity(&self, side: Side) -> &AgentIdentity {
        match side {
            Side::P1 => &self.p1,
            Side::P2 => &self.p2,
        }
    }

    pub fn status(&self) -> BattleStatus {
        self.state.read().status
    }

    pub fn turn(&self) -> u32 {
        self.state.read().turn
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.state.read().outcome
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.state.read().end_reason
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().ended_at
    }

    /// Move from Pending to Active. Returns false if the session already left Pending.
    pub fn activate(&self) -> bool {
        let mut state = self.state.write();
        if state.status != BattleStatus::Pending {
            return false;
        }
        state.status = BattleStatus::Active;
        true
    }

    /// Append a raw chunk and return its index in the log
    pub fn append_chunk(&self, chunk: impl Into<String>) -> usize {
        let mut state = self.state.write();
        state.log.push(chunk.into());
        state.log.len() - 1
    }

    /// Raise the turn number. Lower values are ignored.
    pub fn advance_turn(&self, turn: u32) -> bool {
        let mut state = self.state.write();
        if turn > state.turn {
            state.turn = turn;
            true
        } else {
            false
        }
    }

    /// Transition to Ended. Only the first call has any effect.
    pub fn finish(&self, outcome: Option<Outcome>, reason: EndReason) -> bool {
        let mut state = self.state.write();
        if state.status == BattleStatus::Ended {
            return false;
        }
        state.status = BattleStatus::Ended;
        state.outcome = outcome;
        state.end_reason = Some(reason);
        state.ended_at = Some(Utc::now());
        true
    }

    pub fn log(&self) -> Vec<String> {
        self.state.read().log.clone()
    }

    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }

    /// Fold a decision into the side's running statistics
    pub fn record_decision(&self, side: Side, decision: &Decision) {
        let mut state = self.state.write();
        state.stats[side.index()].record(decision);
        state.last_decision[side.index()] = Some(decision.clone());
    }

    pub fn stats(&self, side: Side) -> SideStats {
        self.state.read().stats[side.index()].clone()
    }

    pub fn last_decision(&self, side: Side) -> Option<Decision> {
        self.state.read().last_decision[side.index()].clone()
    }

    /// Resolve the initial-ready signal
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the first switch-in has been observed
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in self, so this only returns Err if self is gone.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
