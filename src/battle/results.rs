//! Battle outcome record handed to persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::agent::Decision;
use super::session::BattleSession;
use super::state::{AgentIdentity, EndReason, Outcome, Side};

/// Decision stats for one side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideStats {
    /// Commands submitted
    pub decisions: u32,
    /// How many of those came from the random fallback
    pub fallbacks: u32,
    /// Sum of decision latencies
    pub total_latency_ms: u64,
}

impl SideStats {
    pub fn record(&mut self, decision: &Decision) {
        self.decisions += 1;
        if decision.fallback {
            self.fallbacks += 1;
        }
        self.total_latency_ms += decision.latency_ms;
    }

    pub fn average_latency_ms(&self) -> Option<u64> {
        (self.decisions > 0).then(|| self.total_latency_ms / self.decisions as u64)
    }
}

/// Everything persisted about a finished battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRecord {
    pub id: Uuid,
    pub format: String,
    pub p1: AgentIdentity,
    pub p2: AgentIdentity,
    /// Winner (None on a tie or an unresolved end)
    pub winner: Option<Side>,
    pub tie: bool,
    pub end_reason: EndReason,
    pub turns: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub p1_stats: SideStats,
    pub p2_stats: SideStats,
    pub log: Vec<String>,
}

impl BattleRecord {
    /// Build the record from an ended session
    pub fn from_session(session: &BattleSession) -> Self {
        let outcome = session.outcome();
        Self {
            id: session.id,
            format: session.format.clone(),
            p1: session.identity(Side::P1).clone(),
            p2: session.identity(Side::P2).clone(),
            winner: outcome.and_then(|o| o.winner()),
            tie: matches!(outcome, Some(Outcome::Tie)),
            end_reason: session.end_reason().unwrap_or(EndReason::Natural),
            turns: session.turn(),
            started_at: session.started_at,
            ended_at: session.ended_at().unwrap_or_else(Utc::now),
            p1_stats: session.stats(Side::P1),
            p2_stats: session.stats(Side::P2),
            log: session.log(),
        }
    }

    /// Identity of the winner, if any
    pub fn winner_identity(&self) -> Option<&AgentIdentity> {
        self.winner.map(|side| match side {
            Side::P1 => &self.p1,
            Side::P2 => &self.p2,
        })
    }

    /// Short result line, e.g. `openai/gpt-4o beat anthropic/claude in 23 turns`
    pub fn summary(&self) -> String {
        match self.winner {
            Some(side) => {
                let (winner, loser) = match side {
                    Side::P1 => (&self.p1, &self.p2),
                    Side::P2 => (&self.p2, &self.p1),
                };
                format!("{} beat {} in {} turns", winner, loser, self.turns)
            }
            None if self.tie => format!("{} tied {} after {} turns", self.p1, self.p2, self.turns),
            None => format!(
                "{} vs {} ended without a result ({})",
                self.p1,
                self.p2,
                self.end_reason.as_str()
            ),
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to persist battle: {0}")]
pub struct SinkError(pub String);

/// Receives exactly one record per ended session
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn persist(&self, record: BattleRecord) -> Result<(), SinkError>;
}
