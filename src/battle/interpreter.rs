//! Response interpreter: free-form agent text to validated commands
//!
//! Matching precedence (first match wins):
//! 1. explicit move slot ("move 2", "attack 1")
//! 2. explicit switch slot ("switch 3", "swap 2", "change 5")
//! 3. species name of a legal switch target
//! 4. name of a usable move
//!
//! Names match as whole words, longest name first.
//! 5. team preview: "default" or a six digit lead order
//!
//! Anything else yields `None`, and the caller falls back to [`random_choice`].

use std::sync::OnceLock;

use rand::seq::IndexedRandom;
use rand::Rng;
use regex::Regex;

use super::request::{ChoiceConstraints, ChoiceKind, Command};

const MAX_MOVE_SLOT: usize = 4;
const MIN_SWITCH_SLOT: usize = 2;
const MAX_SWITCH_SLOT: usize = 6;

/// Compiled patterns for agent replies
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    move_ref: Regex,
    switch_ref: Regex,
    default_word: Regex,
    team_order: Regex,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseInterpreter {
    pub fn new() -> Self {
        Self {
            move_ref: Regex::new(r"(?i)\b(?:move|attack)\s*#?\s*(\d+)\b").expect("valid regex"),
            switch_ref: Regex::new(r"(?i)\b(?:switch|swap|change)\s*(?:to\s+)?#?\s*(\d+)\b")
                .expect("valid regex"),
            default_word: Regex::new(r"(?i)\bdefault\b").expect("valid regex"),
            team_order: Regex::new(r"\b([1-6]{6})\b").expect("valid regex"),
        }
    }

    /// Resolve agent text to a command the constraints allow
    pub fn interpret(&self, text: &str, constraints: &ChoiceConstraints) -> Option<Command> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(slot) = first_number(&self.move_ref, text) {
            if slot <= MAX_MOVE_SLOT && constraints.move_allowed(slot) {
                return Some(Command::Move(slot as u8));
            }
        }

        if let Some(slot) = first_number(&self.switch_ref, text) {
            if (MIN_SWITCH_SLOT..=MAX_SWITCH_SLOT).contains(&slot)
                && constraints.switch_allowed(slot)
            {
                return Some(Command::Switch(slot as u8));
            }
        }

        let lowered = text.to_lowercase();

        let species = constraints
            .roster
            .iter()
            .enumerate()
            .filter(|(index, _)| constraints.switch_allowed(index + 1))
            .map(|(index, member)| (index + 1, member.species.as_str()));
        if let Some(slot) = longest_mention(&lowered, species) {
            return Some(Command::Switch(slot as u8));
        }

        let moves = constraints
            .moves
            .iter()
            .enumerate()
            .filter(|(index, _)| constraints.move_allowed(index + 1))
            .map(|(index, option)| (index + 1, option.name.as_str()));
        if let Some(slot) = longest_mention(&lowered, moves) {
            return Some(Command::Move(slot as u8));
        }

        if constraints.kind == ChoiceKind::TeamPreview {
            if self.default_word.is_match(text) {
                return Some(Command::Default);
            }
            // Lead orders are passed through verbatim; the engine rejects bad permutations.
            if let Some(order) = self.team_order.captures(text).and_then(|c| c.get(1)) {
                return Some(Command::Team(order.as_str().to_string()));
            }
        }

        None
    }
}

/// Slot of the longest name mentioned as a whole word in `lowered`
fn longest_mention<'a>(
    lowered: &str,
    names: impl Iterator<Item = (usize, &'a str)>,
) -> Option<usize> {
    names
        .filter_map(|(slot, name)| {
            let name = name.trim().to_lowercase();
            mentions_word(lowered, &name).then_some((slot, name.len()))
        })
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(slot, _)| slot)
}

/// `name` occurs in `text` without a letter or digit on either side
fn mentions_word(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    text.match_indices(name).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + name.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn first_number(pattern: &Regex, text: &str) -> Option<usize> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn shared() -> &'static ResponseInterpreter {
    static INTERPRETER: OnceLock<ResponseInterpreter> = OnceLock::new();
    INTERPRETER.get_or_init(ResponseInterpreter::new)
}

/// Interpret text with the shared interpreter
pub fn interpret(text: &str, constraints: &ChoiceConstraints) -> Option<Command> {
    shared().interpret(text, constraints)
}

/// Pick uniformly from the legal action set; `pass` when nothing is legal
pub fn random_choice<R: Rng + ?Sized>(constraints: &ChoiceConstraints, rng: &mut R) -> Command {
    constraints
        .legal_commands()
        .choose(rng)
        .cloned()
        .unwrap_or(Command::Pass)
}
