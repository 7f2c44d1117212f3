//! Agent decision loop
//!
//! One loop per side. It pulls requests from the side's engine channel,
//! asks the side's decision service what to do (bounded by a deadline),
//! interprets the answer and always submits a legal command, falling back to
//! a uniformly random legal choice when the answer is missing or unusable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::broadcast::{BattleEvent, Broadcaster};
use super::interpreter::{interpret, random_choice};
use super::request::{ChoiceConstraints, Command, SideRequest};
use super::session::BattleSession;
use super::situation::{PlainSituationFormatter, SituationFormatter};
use super::state::Side;
use crate::decision::{DecisionError, DecisionReply, DecisionService};
use crate::engine::{EngineMessage, SideChannel};

/// Default deadline for one decision
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_millis(30_000);

const REASONING_BUFFER: usize = 64;

/// A command chosen for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub command: Command,
    pub reasoning: Option<String>,
    pub latency_ms: u64,
    /// Chosen by the random fallback rather than the agent
    pub fallback: bool,
}

/// Why a loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session ended and the gate stopped the loop
    Cancelled,
    /// The engine closed the request channel
    RequestsClosed,
    /// The engine stopped accepting commands
    CommandsClosed,
}

impl LoopExit {
    /// The engine went away underneath the loop
    pub fn is_stream_failure(&self) -> bool {
        !matches!(self, LoopExit::Cancelled)
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct AgentLoop {
    side: Side,
    session: Arc<BattleSession>,
    channel: SideChannel,
    service: Arc<dyn DecisionService>,
    formatter: Arc<dyn SituationFormatter>,
    broadcaster: Broadcaster,
    deadline: Duration,
    /// Actionable requests seen so far
    turn: u32,
    last_decision: Option<Decision>,
    /// Constraints of the request the last command answered, until the engine rejects it
    answered: Option<ChoiceConstraints>,
    rng: StdRng,
}

impl AgentLoop {
    pub fn new(
        side: Side,
        session: Arc<BattleSession>,
        channel: SideChannel,
        service: Arc<dyn DecisionService>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            side,
            session,
            channel,
            service,
            formatter: Arc::new(PlainSituationFormatter::default()),
            broadcaster,
            deadline: DEFAULT_DECISION_TIMEOUT,
            turn: 0,
            last_decision: None,
            answered: None,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn SituationFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Deterministic fallback choices
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    /// Process requests in arrival order until cancelled or the engine goes away
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        let battle_id = self.session.id;
        let side = self.side;
        tracing::debug!(%battle_id, %side, provider = self.service.provider(), "Agent loop started");

        let exit = loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                message = self.channel.requests.recv() => message,
            };
            let Some(message) = message else {
                break LoopExit::RequestsClosed;
            };

            let unavailable = message.is_unavailable_choice();
            let request = match message {
                EngineMessage::Request(request) => request,
                EngineMessage::Error(error) if unavailable => {
                    // a corrected request follows
                    tracing::info!(%battle_id, %side, error = %error, "Engine rejected choice");
                    continue;
                }
                EngineMessage::Error(error) => {
                    // no corrected request follows, so answer the rejected one once more
                    let Some(constraints) = self.answered.take() else {
                        tracing::warn!(%battle_id, %side, error = %error, "Engine error");
                        continue;
                    };
                    let command = random_choice(&constraints, &mut self.rng);
                    tracing::warn!(
                        %battle_id,
                        %side,
                        turn = self.turn,
                        error = %error,
                        command = %command,
                        "Engine rejected choice, using fallback command"
                    );
                    let decision = Decision {
                        command,
                        reasoning: None,
                        latency_ms: 0,
                        fallback: true,
                    };
                    if self.submit(decision).await.is_err() {
                        break LoopExit::CommandsClosed;
                    }
                    continue;
                }
            };

            let Some(constraints) = request.constraints() else {
                tracing::trace!(%battle_id, %side, "Waiting on opponent");
                self.answered = None;
                continue;
            };

            let decision = tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                decision = self.resolve(&request, &constraints) => decision,
            };

            if self.submit(decision).await.is_err() {
                break LoopExit::CommandsClosed;
            }
            self.answered = Some(constraints);
        };

        tracing::debug!(%battle_id, %side, turn = self.turn, exit = ?exit, "Agent loop stopped");
        exit
    }

    /// Turn one actionable request into a decision. Never fails.
    async fn resolve(&mut self, request: &SideRequest, constraints: &ChoiceConstraints) -> Decision {
        self.turn += 1;
        let started = Instant::now();
        self.broadcaster.publish(BattleEvent::Thinking {
            battle_id: self.session.id,
            side: self.side,
            turn: self.turn,
            started_at: Utc::now(),
        });

        let log = self.session.log();
        let situation = self.formatter.describe(self.side, request, &log, self.turn);
        let reply = self.ask(situation).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let reasoning = reply.as_ref().and_then(|r| r.reasoning.clone());
        match reply
            .as_ref()
            .and_then(|r| interpret(&r.command, constraints))
        {
            Some(command) => Decision {
                command,
                reasoning,
                latency_ms,
                fallback: false,
            },
            None => {
                let command = random_choice(constraints, &mut self.rng);
                tracing::info!(
                    battle_id = %self.session.id,
                    side = %self.side,
                    turn = self.turn,
                    latency_ms,
                    reply = reply.as_ref().map(|r| r.command.as_str()).unwrap_or(""),
                    command = %command,
                    "Using fallback command"
                );
                Decision {
                    command,
                    reasoning,
                    latency_ms,
                    fallback: true,
                }
            }
        }
    }

    /// Race the decision service against the deadline.
    ///
    /// The service call runs on its own task and is aborted if the deadline
    /// wins. Exactly one `done` reasoning marker is published either way.
    async fn ask(&self, situation: String) -> Option<DecisionReply> {
        let battle_id = self.session.id;
        let side = self.side;

        let (chunks, forwarder) = if self.service.supports_streaming() {
            let (tx, mut rx) = mpsc::channel::<String>(REASONING_BUFFER);
            let broadcaster = self.broadcaster.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    broadcaster.publish(BattleEvent::ReasoningChunk {
                        battle_id,
                        side,
                        chunk,
                        done: false,
                    });
                }
            });
            (Some(tx), Some(forwarder))
        } else {
            (None, None)
        };

        let service = self.service.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            service.decide(&situation, chunks).await
        }));
        let result = tokio::time::timeout(self.deadline, &mut task.0).await;
        drop(task);

        // ends once the (finished or aborted) call drops its sender
        if let Some(forwarder) = forwarder {
            let _ = forwarder.await;
        }
        self.broadcaster.publish(BattleEvent::ReasoningChunk {
            battle_id,
            side,
            chunk: String::new(),
            done: true,
        });

        match result {
            Ok(Ok(Ok(reply))) => Some(reply),
            Ok(Ok(Err(DecisionError::Declined))) => None,
            Ok(Ok(Err(error))) => {
                tracing::warn!(%battle_id, %side, turn = self.turn, error = %error, "Decision service failed");
                None
            }
            Ok(Err(error)) => {
                tracing::warn!(%battle_id, %side, turn = self.turn, error = %error, "Decision task failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    %battle_id,
                    %side,
                    turn = self.turn,
                    timeout_ms = self.deadline.as_millis() as u64,
                    "Decision timed out"
                );
                None
            }
        }
    }

    /// Send a command to the engine, then announce and record it
    async fn submit(&mut self, decision: Decision) -> Result<(), mpsc::error::SendError<Command>> {
        self.channel.commands.send(decision.command.clone()).await?;
        self.publish_decision(&decision);
        self.session.record_decision(self.side, &decision);
        self.last_decision = Some(decision);
        Ok(())
    }

    fn publish_decision(&self, decision: &Decision) {
        self.broadcaster.publish(BattleEvent::Decision {
            battle_id: self.session.id,
            side: self.side,
            turn: self.turn,
            command: decision.command.to_string(),
            reasoning: decision.reasoning.clone(),
            latency_ms: decision.latency_ms,
            fallback: decision.fallback,
        });
    }
}
