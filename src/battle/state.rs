//! Battle state tracking

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two competing sides in a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    P1,
    P2,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::P1, Side::P2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::P1 => "p1",
            Side::P2 => "p2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "p1" => Some(Side::P1),
            "p2" => Some(Side::P2),
            _ => None,
        }
    }

    pub fn opponent(&self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Side::P1 => 0,
            Side::P2 => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider + model label identifying the agent playing a side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub provider: String,
    pub model: String,
}

impl AgentIdentity {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Display label, also used as the player name handed to the engine
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Lifecycle of a battle session. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    #[default]
    Pending,
    Active,
    Ended,
}

impl BattleStatus {
    /// Check if the battle still occupies the gate
    pub fn is_live(&self) -> bool {
        matches!(self, BattleStatus::Pending | BattleStatus::Active)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, BattleStatus::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BattleStatus::Pending => "pending",
            BattleStatus::Active => "active",
            BattleStatus::Ended => "ended",
        }
    }
}

/// Final result reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outcome {
    Win { side: Side },
    Tie,
}

impl Outcome {
    /// Get the winning side, if any
    pub fn winner(&self) -> Option<Side> {
        match self {
            Outcome::Win { side } => Some(*side),
            Outcome::Tie => None,
        }
    }
}

/// Why a session reached `Ended`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The engine reported a win or tie
    Natural,
    /// An operator force-ended the match
    Forced,
    /// An engine channel terminated unexpectedly
    EngineFailure,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Natural => "natural",
            EndReason::Forced => "forced",
            EndReason::EngineFailure => "engine_failure",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "forced" => EndReason::Forced,
            "engine_failure" => EndReason::EngineFailure,
            _ => EndReason::Natural,
        }
    }
}
