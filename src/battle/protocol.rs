//! Protocol stream parsing, outcome detection and replay
//!
//! Engine lines look like `|marker|arg1|arg2|...`. Only a handful of markers
//! matter to the orchestrator: `turn`, `switch`, `player`, `win` and `tie`.

use serde::Serialize;

use super::state::{Outcome, Side};

/// A single parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolLine<'a> {
    Player { side: Side, name: &'a str },
    Turn(u32),
    Switch { side: Side, species: &'a str },
    Win(&'a str),
    Tie,
    Other,
}

impl<'a> ProtocolLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix('|') else {
            return ProtocolLine::Other;
        };
        let mut parts = rest.split('|');
        let marker = parts.next().unwrap_or_default();
        match marker {
            "turn" => parts
                .next()
                .and_then(|n| n.trim().parse().ok())
                .map(ProtocolLine::Turn)
                .unwrap_or(ProtocolLine::Other),
            "player" => {
                let side = parts.next().and_then(Side::parse);
                let name = parts.next().unwrap_or_default();
                match side {
                    Some(side) if !name.is_empty() => ProtocolLine::Player { side, name },
                    _ => ProtocolLine::Other,
                }
            }
            "switch" | "drag" => {
                let ident = parts.next().unwrap_or_default();
                let details = parts.next().unwrap_or_default();
                match parse_ident(ident) {
                    Some((side, nickname)) => {
                        let species = details.split(',').next().unwrap_or_default().trim();
                        let species = if species.is_empty() { nickname } else { species };
                        ProtocolLine::Switch { side, species }
                    }
                    None => ProtocolLine::Other,
                }
            }
            "win" => ProtocolLine::Win(parts.next().unwrap_or_default()),
            "tie" => ProtocolLine::Tie,
            _ => ProtocolLine::Other,
        }
    }
}

/// `p1a: Pikachu` -> (P1, "Pikachu")
fn parse_ident(ident: &str) -> Option<(Side, &str)> {
    let (position, name) = ident.split_once(':')?;
    let side = Side::parse(position.get(..2)?)?;
    Some((side, name.trim()))
}

/// Player names announced by the engine, used to resolve `|win|name`
#[derive(Debug, Clone, Default)]
pub struct PlayerNames {
    names: [Option<String>; 2],
}

impl PlayerNames {
    pub fn new(p1: impl Into<String>, p2: impl Into<String>) -> Self {
        Self {
            names: [Some(p1.into()), Some(p2.into())],
        }
    }

    pub fn set(&mut self, side: Side, name: &str) {
        self.names[side.index()] = Some(name.to_string());
    }

    pub fn resolve(&self, name: &str) -> Option<Side> {
        let name = name.trim();
        Side::BOTH
            .into_iter()
            .find(|side| self.names[side.index()].as_deref() == Some(name))
    }
}

/// What one chunk changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkEffects {
    /// Highest turn marker seen in this chunk
    pub turn: Option<u32>,
    /// First switch-in ever observed
    pub became_ready: bool,
    /// First win/tie marker ever observed
    pub outcome: Option<DetectedOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedOutcome {
    /// Winner resolved, or a tie
    Resolved(Outcome),
    /// A win marker named a player we could not map to a side
    Unresolved,
}

impl DetectedOutcome {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            DetectedOutcome::Resolved(outcome) => Some(*outcome),
            DetectedOutcome::Unresolved => None,
        }
    }
}

/// Scans chunks for turn and outcome boundaries.
///
/// Both the initial-ready signal and the outcome fire at most once.
#[derive(Debug, Clone)]
pub struct OutcomeDetector {
    players: PlayerNames,
    ready: bool,
    ended: bool,
}

impl OutcomeDetector {
    pub fn new(players: PlayerNames) -> Self {
        Self {
            players,
            ready: false,
            ended: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn scan(&mut self, chunk: &str) -> ChunkEffects {
        let mut effects = ChunkEffects::default();
        for line in chunk.lines() {
            match ProtocolLine::parse(line) {
                ProtocolLine::Player { side, name } => self.players.set(side, name),
                ProtocolLine::Turn(n) => {
                    effects.turn = Some(effects.turn.map_or(n, |t| t.max(n)));
                }
                ProtocolLine::Switch { .. } => {
                    if !self.ready {
                        self.ready = true;
                        effects.became_ready = true;
                    }
                }
                ProtocolLine::Win(name) => {
                    if !self.ended {
                        self.ended = true;
                        effects.outcome = Some(match self.players.resolve(name) {
                            Some(side) => DetectedOutcome::Resolved(Outcome::Win { side }),
                            None => DetectedOutcome::Unresolved,
                        });
                    }
                }
                ProtocolLine::Tie => {
                    if !self.ended {
                        self.ended = true;
                        effects.outcome = Some(DetectedOutcome::Resolved(Outcome::Tie));
                    }
                }
                ProtocolLine::Other => {}
            }
        }
        effects
    }
}

/// State reconstructed by replaying a protocol log from empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolReplay {
    pub turn: u32,
    pub outcome: Option<Outcome>,
    pub p1_active: Option<String>,
    pub p2_active: Option<String>,
}

impl ProtocolReplay {
    pub fn replay<S: AsRef<str>>(log: &[S], players: PlayerNames) -> Self {
        let mut detector = OutcomeDetector::new(players);
        let mut state = ProtocolReplay::default();
        for chunk in log {
            let chunk = chunk.as_ref();
            for line in chunk.lines() {
                if let ProtocolLine::Switch { side, species } = ProtocolLine::parse(line) {
                    match side {
                        Side::P1 => state.p1_active = Some(species.to_string()),
                        Side::P2 => state.p2_active = Some(species.to_string()),
                    }
                }
            }
            let effects = detector.scan(chunk);
            if let Some(turn) = effects.turn {
                state.turn = state.turn.max(turn);
            }
            if let Some(detected) = effects.outcome {
                state.outcome = detected.outcome();
            }
        }
        state
    }

    pub fn active(&self, side: Side) -> Option<&str> {
        match side {
            Side::P1 => self.p1_active.as_deref(),
            Side::P2 => self.p2_active.as_deref(),
        }
    }
}
