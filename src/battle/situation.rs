//! Natural-language rendering of a request for a decision service

use std::fmt::Write as _;

use super::request::{ChoiceKind, SideRequest};
use super::state::Side;

/// Default number of protocol lines included in a situation
pub const DEFAULT_LOG_TAIL_LINES: usize = 40;

/// Renders a raw request plus battle context into a prompt
pub trait SituationFormatter: Send + Sync {
    fn describe(&self, side: Side, request: &SideRequest, log: &[String], turn: u32) -> String;
}

/// Plain-text formatter: header, recent protocol lines, enumerated options
#[derive(Debug, Clone)]
pub struct PlainSituationFormatter {
    tail_lines: usize,
}

impl Default for PlainSituationFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_TAIL_LINES)
    }
}

impl PlainSituationFormatter {
    pub fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }

    fn recent_lines<'a>(&self, log: &'a [String]) -> Vec<&'a str> {
        let lines: Vec<&str> = log
            .iter()
            .flat_map(|chunk| chunk.lines())
            .filter(|line| !line.trim().is_empty() && *line != "|")
            .collect();
        let skip = lines.len().saturating_sub(self.tail_lines);
        lines[skip..].to_vec()
    }
}

impl SituationFormatter for PlainSituationFormatter {
    fn describe(&self, side: Side, request: &SideRequest, log: &[String], turn: u32) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "You are player {}. Turn {}.", side, turn);

        let recent = self.recent_lines(log);
        if !recent.is_empty() {
            let _ = writeln!(out, "\nRecent battle log:");
            for line in recent {
                let _ = writeln!(out, "{}", line);
            }
        }

        let Some(constraints) = request.constraints() else {
            let _ = writeln!(out, "\nNo action is required right now.");
            return out;
        };

        let _ = writeln!(out);
        match constraints.kind {
            ChoiceKind::TeamPreview => {
                let _ = writeln!(out, "Team preview. Your team:");
                for (i, member) in constraints.roster.iter().enumerate() {
                    let _ = writeln!(out, "  {}: {}", i + 1, member.species);
                }
                let _ = writeln!(
                    out,
                    "Answer \"default\" or a six-digit lead order such as \"123456\"."
                );
                return out;
            }
            ChoiceKind::ForcedSwitch => {
                let _ = writeln!(out, "Your active Pokemon fainted. You must switch.");
            }
            ChoiceKind::Active => {
                if constraints.trapped {
                    let _ = writeln!(out, "You are trapped and cannot switch.");
                }
            }
        }

        let _ = writeln!(out, "Your options:");
        for (i, option) in constraints.moves.iter().enumerate() {
            if constraints.kind != ChoiceKind::Active {
                break;
            }
            let note = if option.disabled { " (disabled)" } else { "" };
            let _ = writeln!(out, "  move {}: {}{}", i + 1, option.name, note);
        }
        for (i, member) in constraints.roster.iter().enumerate() {
            let slot = i + 1;
            let note = if member.active {
                " (active)"
            } else if member.fainted {
                " (fainted)"
            } else if !constraints.switch_allowed(slot) {
                " (unavailable)"
            } else {
                ""
            };
            let _ = writeln!(out, "  switch {}: {}{}", slot, member.species, note);
        }
        out
    }
}
