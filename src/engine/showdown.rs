//! Engine backed by the `pokemon-showdown simulate-battle` process
//!
//! The simulator reads `>`-prefixed commands on stdin and writes blocks on
//! stdout: `update` (protocol lines for everyone), `sideupdate` (a player id
//! followed by that player's `|request|` / `|error|` lines) and `end`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BattleEngine, EngineController, EngineError, EngineHandle, EngineMessage, SideChannel};
use crate::battle::{AgentIdentity, Command, MoveOption, RosterMember, Side, SideRequest};

const BINARY_NAME: &str = "pokemon-showdown";

pub struct ShowdownEngine {
    binary_path: Option<PathBuf>,
}

impl Default for ShowdownEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShowdownEngine {
    pub fn new() -> Self {
        Self { binary_path: None }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            binary_path: Some(path),
        }
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(path) = self.binary_path.clone() {
            if path.exists() {
                return Some(path);
            }
        }
        which::which(BINARY_NAME).ok()
    }

    fn build_command(&self) -> Result<ProcessCommand, EngineError> {
        let binary = self
            .resolve_binary()
            .ok_or_else(|| EngineError::BinaryNotFound(BINARY_NAME.to_string()))?;

        let mut cmd = ProcessCommand::new(binary);
        cmd.arg("simulate-battle");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl BattleEngine for ShowdownEngine {
    fn name(&self) -> &'static str {
        "showdown"
    }

    fn is_available(&self) -> bool {
        self.resolve_binary().is_some()
    }

    async fn start_match(
        &self,
        format: &str,
        p1: &AgentIdentity,
        p2: &AgentIdentity,
    ) -> Result<EngineHandle, EngineError> {
        let mut cmd = self.build_command()?;
        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::ProcessSpawnFailed(e.to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("stdout not captured".into()))?;

        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);

        // Writer: one command per line
        tokio::spawn(async move {
            while let Some(line) = input_rx.recv().await {
                tracing::trace!(line = %line, "Simulator input");
                let write = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(error) = write.await {
                    tracing::warn!(error = %error, "Failed to write to simulator stdin");
                    break;
                }
            }
        });

        for line in start_lines(format, p1, p2) {
            input_tx
                .send(line)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
        }

        let (p1_req_tx, p1_req_rx) = mpsc::channel::<EngineMessage>(16);
        let (p2_req_tx, p2_req_rx) = mpsc::channel::<EngineMessage>(16);
        let (omni_tx, omni_rx) = mpsc::channel::<String>(256);

        let p1_cmd_tx = spawn_command_forwarder(Side::P1, input_tx.clone());
        let p2_cmd_tx = spawn_command_forwarder(Side::P2, input_tx.clone());

        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut parser = OutputParser::default();
            let router = BlockRouter {
                p1: p1_req_tx,
                p2: p2_req_tx,
                omniscient: omni_tx,
            };

            loop {
                let line = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        if let Some(block) = parser.push_line(&line) {
                            if !router.route(block).await {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "Failed to read simulator output");
                        break;
                    }
                }
            }
            if let Some(block) = parser.finish() {
                router.route(block).await;
            }

            if let Err(error) = child.kill().await {
                tracing::debug!(error = %error, "Simulator already exited");
            }
        });

        Ok(EngineHandle {
            p1: SideChannel::new(p1_req_rx, p1_cmd_tx),
            p2: SideChannel::new(p2_req_rx, p2_cmd_tx),
            omniscient: omni_rx,
            controller: Arc::new(ShowdownController {
                input: input_tx,
                cancel,
            }),
        })
    }
}

fn start_lines(format: &str, p1: &AgentIdentity, p2: &AgentIdentity) -> Vec<String> {
    vec![
        format!(">start {}", serde_json::json!({ "formatid": format })),
        format!(">player p1 {}", serde_json::json!({ "name": p1.label() })),
        format!(">player p2 {}", serde_json::json!({ "name": p2.label() })),
    ]
}

fn spawn_command_forwarder(side: Side, input: mpsc::Sender<String>) -> mpsc::Sender<Command> {
    let (tx, mut rx) = mpsc::channel::<Command>(4);
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            if input.send(format!(">{} {}", side, command)).await.is_err() {
                break;
            }
        }
    });
    tx
}

struct ShowdownController {
    input: mpsc::Sender<String>,
    cancel: CancellationToken,
}

#[async_trait]
impl EngineController for ShowdownController {
    async fn force_tie(&self) -> Result<(), EngineError> {
        self.input
            .send(">forcetie".to_string())
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// A complete stdout block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBlock {
    Update(Vec<String>),
    SideUpdate { side: Side, lines: Vec<String> },
    End(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockKind {
    Update,
    SideUpdate(Option<Side>),
    End,
}

/// Line-oriented parser for simulator stdout.
///
/// A block starts at a header line and ends at a blank line or the next header.
#[derive(Debug, Default)]
pub struct OutputParser {
    current: Option<(BlockKind, Vec<String>)>,
}

impl OutputParser {
    pub fn push_line(&mut self, line: &str) -> Option<OutputBlock> {
        let header = match line {
            "update" => Some(BlockKind::Update),
            "sideupdate" => Some(BlockKind::SideUpdate(None)),
            "end" => Some(BlockKind::End),
            _ => None,
        };
        if let Some(kind) = header {
            let finished = self.flush();
            self.current = Some((kind, Vec::new()));
            return finished;
        }
        if line.is_empty() {
            return self.flush();
        }

        match &mut self.current {
            Some((kind @ BlockKind::SideUpdate(None), _)) => {
                *kind = BlockKind::SideUpdate(Side::parse(line));
            }
            Some((_, lines)) => lines.push(line.to_string()),
            None => tracing::trace!(line = %line, "Simulator output outside a block"),
        }
        None
    }

    pub fn finish(&mut self) -> Option<OutputBlock> {
        self.flush()
    }

    fn flush(&mut self) -> Option<OutputBlock> {
        let (kind, lines) = self.current.take()?;
        match kind {
            BlockKind::Update => Some(OutputBlock::Update(lines)),
            BlockKind::SideUpdate(Some(side)) => Some(OutputBlock::SideUpdate { side, lines }),
            BlockKind::SideUpdate(None) => None,
            BlockKind::End => Some(OutputBlock::End(lines.join("\n"))),
        }
    }
}

struct BlockRouter {
    p1: mpsc::Sender<EngineMessage>,
    p2: mpsc::Sender<EngineMessage>,
    omniscient: mpsc::Sender<String>,
}

impl BlockRouter {
    /// Returns false once the match is over or the omniscient receiver is gone
    async fn route(&self, block: OutputBlock) -> bool {
        match block {
            OutputBlock::Update(lines) => {
                let chunk = omniscient_chunk(&lines);
                if chunk.is_empty() {
                    return true;
                }
                self.omniscient.send(chunk).await.is_ok()
            }
            OutputBlock::SideUpdate { side, lines } => {
                let tx = match side {
                    Side::P1 => &self.p1,
                    Side::P2 => &self.p2,
                };
                for message in side_messages(&lines) {
                    if tx.send(message).await.is_err() {
                        tracing::debug!(%side, "Side channel closed");
                    }
                }
                true
            }
            OutputBlock::End(_) => false,
        }
    }
}

/// Collapse `|split|pN` sections to their secret line
pub fn omniscient_chunk(lines: &[String]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut iter = lines.iter();
    while let Some(line) = iter.next() {
        if line.starts_with("|split|") {
            if let Some(secret) = iter.next() {
                out.push(secret);
            }
            // public copy of the same line
            iter.next();
        } else {
            out.push(line);
        }
    }
    out.join("\n")
}

/// Convert a side block to request/error messages
pub fn side_messages(lines: &[String]) -> Vec<EngineMessage> {
    let mut messages = Vec::new();
    for line in lines {
        if let Some(json) = line.strip_prefix("|request|") {
            if json.trim().is_empty() {
                continue;
            }
            match parse_request(json) {
                Ok(request) => messages.push(EngineMessage::Request(request)),
                Err(error) => tracing::warn!(error = %error, "Failed to parse side request"),
            }
        } else if let Some(error) = line.strip_prefix("|error|") {
            messages.push(EngineMessage::Error(error.to_string()));
        }
    }
    messages
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    #[serde(default)]
    active: Vec<RawActive>,
    #[serde(default)]
    force_switch: Vec<bool>,
    #[serde(default)]
    team_preview: bool,
    #[serde(default)]
    wait: bool,
    side: Option<RawSide>,
}

#[derive(Debug, Deserialize)]
struct RawActive {
    #[serde(default)]
    moves: Vec<RawMove>,
    #[serde(default)]
    trapped: bool,
}

#[derive(Debug, Deserialize)]
struct RawMove {
    #[serde(rename = "move")]
    name: String,
    /// Either a bool or the name of whatever disabled it
    #[serde(default)]
    disabled: Value,
}

#[derive(Debug, Deserialize)]
struct RawSide {
    #[serde(default)]
    pokemon: Vec<RawPokemon>,
}

#[derive(Debug, Deserialize)]
struct RawPokemon {
    #[serde(default)]
    ident: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    active: bool,
}

impl RawPokemon {
    fn species(&self) -> String {
        let from_details = self.details.split(',').next().unwrap_or_default().trim();
        if !from_details.is_empty() {
            return from_details.to_string();
        }
        self.ident
            .split_once(':')
            .map(|(_, name)| name.trim().to_string())
            .unwrap_or_default()
    }
}

/// Decode a `|request|` payload into the typed request schema
pub fn parse_request(json: &str) -> Result<SideRequest, EngineError> {
    let raw: RawRequest =
        serde_json::from_str(json).map_err(|e| EngineError::Protocol(e.to_string()))?;

    if raw.wait {
        return Ok(SideRequest::Wait);
    }

    let roster: Vec<RosterMember> = raw
        .side
        .map(|side| side.pokemon)
        .unwrap_or_default()
        .iter()
        .map(|p| RosterMember {
            species: p.species(),
            fainted: p.condition.ends_with(" fnt") || p.condition == "0 fnt",
            active: p.active,
        })
        .collect();

    if raw.team_preview {
        return Ok(SideRequest::TeamPreview { roster });
    }
    if raw.force_switch.iter().any(|forced| *forced) {
        return Ok(SideRequest::ForcedSwitch { roster });
    }
    if let Some(active) = raw.active.first() {
        let moves = active
            .moves
            .iter()
            .map(|m| MoveOption {
                name: m.name.clone(),
                disabled: matches!(m.disabled, Value::Bool(true) | Value::String(_)),
            })
            .collect();
        return Ok(SideRequest::ActiveChoice {
            moves,
            trapped: active.trapped,
            roster,
        });
    }

    Ok(SideRequest::Wait)
}
