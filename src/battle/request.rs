//! Decision requests supplied by the engine, and the commands that answer them

use std::fmt;

use serde::{Deserialize, Serialize};

/// A move slot offered in an active-choice request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOption {
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
}

impl MoveOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// A member of the side's roster, in roster order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub species: String,
    #[serde(default)]
    pub fainted: bool,
    #[serde(default)]
    pub active: bool,
}

impl RosterMember {
    pub fn new(species: impl Into<String>) -> Self {
        Self {
            species: species.into(),
            fainted: false,
            active: false,
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn fainted(mut self) -> Self {
        self.fainted = true;
        self
    }

    /// Can this member be switched in right now
    pub fn is_switch_target(&self) -> bool {
        !self.fainted && !self.active
    }
}

/// One unit of required input for a side.
///
/// `Wait` means the opponent is still choosing; it never produces a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideRequest {
    ActiveChoice {
        moves: Vec<MoveOption>,
        trapped: bool,
        roster: Vec<RosterMember>,
    },
    ForcedSwitch {
        roster: Vec<RosterMember>,
    },
    TeamPreview {
        roster: Vec<RosterMember>,
    },
    Wait,
}

impl SideRequest {
    /// Whether this request requires the side to act
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SideRequest::Wait)
    }

    /// Read-only constraints for the interpreter, or `None` for `Wait`
    pub fn constraints(&self) -> Option<ChoiceConstraints> {
        match self {
            SideRequest::ActiveChoice {
                moves,
                trapped,
                roster,
            } => Some(ChoiceConstraints {
                kind: ChoiceKind::Active,
                moves: moves.clone(),
                trapped: *trapped,
                roster: roster.clone(),
            }),
            SideRequest::ForcedSwitch { roster } => Some(ChoiceConstraints {
                kind: ChoiceKind::ForcedSwitch,
                moves: Vec::new(),
                trapped: false,
                roster: roster.clone(),
            }),
            SideRequest::TeamPreview { roster } => Some(ChoiceConstraints {
                kind: ChoiceKind::TeamPreview,
                moves: Vec::new(),
                trapped: false,
                roster: roster.clone(),
            }),
            SideRequest::Wait => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SideRequest::ActiveChoice { .. } => "active_choice",
            SideRequest::ForcedSwitch { .. } => "forced_switch",
            SideRequest::TeamPreview { .. } => "team_preview",
            SideRequest::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    Active,
    ForcedSwitch,
    TeamPreview,
}

/// What the engine allows for one actionable request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceConstraints {
    pub kind: ChoiceKind,
    pub moves: Vec<MoveOption>,
    pub trapped: bool,
    pub roster: Vec<RosterMember>,
}

impl ChoiceConstraints {
    /// Check a 1-based move slot
    pub fn move_allowed(&self, slot: usize) -> bool {
        self.kind == ChoiceKind::Active
            && slot >= 1
            && self.moves.get(slot - 1).is_some_and(|m| !m.disabled)
    }

    /// Check a 1-based roster slot as a switch target
    pub fn switch_allowed(&self, slot: usize) -> bool {
        let can_switch = match self.kind {
            ChoiceKind::Active => !self.trapped,
            ChoiceKind::ForcedSwitch => true,
            ChoiceKind::TeamPreview => false,
        };
        can_switch
            && slot >= 1
            && self
                .roster
                .get(slot - 1)
                .is_some_and(RosterMember::is_switch_target)
    }

    /// The complete legal action set, in a stable order
    pub fn legal_commands(&self) -> Vec<Command> {
        let mut legal = Vec::new();
        match self.kind {
            ChoiceKind::TeamPreview => legal.push(Command::Default),
            ChoiceKind::Active | ChoiceKind::ForcedSwitch => {
                for slot in 1..=self.moves.len() {
                    if self.move_allowed(slot) {
                        legal.push(Command::Move(slot as u8));
                    }
                }
                for slot in 1..=self.roster.len() {
                    if self.switch_allowed(slot) {
                        legal.push(Command::Switch(slot as u8));
                    }
                }
            }
        }
        legal
    }
}

/// Canonical command submitted to the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// 1-based move slot
    Move(u8),
    /// 1-based roster slot
    Switch(u8),
    /// Team-preview lead order, digits verbatim
    Team(String),
    Default,
    Pass,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move(slot) => write!(f, "move {}", slot),
            Command::Switch(slot) => write!(f, "switch {}", slot),
            Command::Team(order) => write!(f, "team {}", order),
            Command::Default => f.write_str("default"),
            Command::Pass => f.write_str("pass"),
        }
    }
}

impl Serialize for Command {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
