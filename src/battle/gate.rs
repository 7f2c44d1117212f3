//! Battle session gate
//!
//! Owns the one current session (or none) and exposes start, status and
//! force-end. Starting reserves the slot under a lock before any async work,
//! so two concurrent starts can never both get past the active check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent::{AgentLoop, LoopExit, DEFAULT_DECISION_TIMEOUT};
use super::broadcast::{BattleEvent, Broadcaster, ObserverSnapshot};
use super::protocol::{OutcomeDetector, PlayerNames};
use super::results::{BattleRecord, OutcomeSink};
use super::session::BattleSession;
use super::situation::{PlainSituationFormatter, SituationFormatter};
use super::state::{AgentIdentity, EndReason, Outcome, Side};
use crate::decision::{DecisionError, DecisionRegistry, DecisionService};
use crate::engine::{BattleEngine, EngineController, EngineError, EngineHandle};

pub const DEFAULT_FORMAT: &str = "gen9randombattle";

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Invalid battle request: {0}")]
    Validation(String),
    #[error("Battle {battle_id} is already active")]
    AlreadyActive { battle_id: Uuid },
    #[error("No active battle")]
    NotActive,
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Body of a start call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub p1: AgentIdentity,
    pub p2: AgentIdentity,
    #[serde(default)]
    pub format: Option<String>,
}

impl StartRequest {
    pub fn new(p1: AgentIdentity, p2: AgentIdentity) -> Self {
        Self {
            p1,
            p2,
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub default_format: String,
    pub decision_timeout: Duration,
    /// How long to wait for the protocol stream to report an outcome after a
    /// side channel closes
    pub stream_grace: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_format: DEFAULT_FORMAT.to_string(),
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
            stream_grace: Duration::from_secs(2),
        }
    }
}

/// The session currently held by the gate
#[derive(Clone)]
struct Running {
    session: Arc<BattleSession>,
    controller: Option<Arc<dyn EngineController>>,
    cancel: CancellationToken,
    forced: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct BattleGate {
    engine: Arc<dyn BattleEngine>,
    registry: Arc<DecisionRegistry>,
    formatter: Arc<dyn SituationFormatter>,
    sink: Option<Arc<dyn OutcomeSink>>,
    broadcaster: Broadcaster,
    config: Arc<GateConfig>,
    slot: Arc<Mutex<Option<Running>>>,
}

impl BattleGate {
    pub fn new(
        engine: Arc<dyn BattleEngine>,
        registry: DecisionRegistry,
        broadcaster: Broadcaster,
        config: GateConfig,
    ) -> Self {
        Self {
            engine,
            registry: Arc::new(registry),
            formatter: Arc::new(PlainSituationFormatter::default()),
            sink: None,
            broadcaster,
            config: Arc::new(config),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn SituationFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BattleEvent> {
        self.broadcaster.subscribe()
    }

    /// The current (possibly ended) session
    pub fn current(&self) -> Option<Arc<BattleSession>> {
        self.slot.lock().as_ref().map(|r| r.session.clone())
    }

    /// Snapshot for an observer that just connected or asked
    pub fn status(&self) -> ObserverSnapshot {
        let session = self.current();
        ObserverSnapshot::capture(session.as_deref(), self.broadcaster.observer_count())
    }

    /// Id and full protocol log of the current session
    pub fn protocol_log(&self) -> Option<(Uuid, Vec<String>)> {
        self.current().map(|s| (s.id, s.log()))
    }

    /// Start a new battle, failing if one is already live
    pub async fn start(&self, request: StartRequest) -> Result<Uuid, GateError> {
        let format = request
            .format
            .clone()
            .unwrap_or_else(|| self.config.default_format.clone());
        let (p1_service, p2_service) = self.validate(&request, &format)?;

        let running = self.reserve(&format, request.p1.clone(), request.p2.clone())?;
        let session = running.session.clone();
        let battle_id = session.id;
        tracing::info!(
            %battle_id,
            format = %format,
            p1 = %request.p1,
            p2 = %request.p2,
            engine = self.engine.name(),
            "Starting battle"
        );

        let handle = match self
            .engine
            .start_match(&format, &request.p1, &request.p2)
            .await
        {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(%battle_id, error = %error, "Engine failed to start");
                self.conclude(&session, None, EndReason::EngineFailure);
                running.cancel.cancel();
                return Err(GateError::Engine(error));
            }
        };

        {
            let mut slot = self.slot.lock();
            if let Some(current) = slot.as_mut().filter(|r| r.session.id == battle_id) {
                current.controller = Some(handle.controller.clone());
            }
        }
        // force-ended while the engine was starting
        if session.status().is_ended() {
            handle.controller.shutdown();
            return Ok(battle_id);
        }
        session.activate();

        self.spawn_battle(running, handle, p1_service, p2_service);
        Ok(battle_id)
    }

    /// Resolve the current battle as a tie right now
    pub async fn force_end(&self) -> Result<Uuid, GateError> {
        let running = self
            .slot
            .lock()
            .as_ref()
            .filter(|r| r.session.status().is_live())
            .cloned()
            .ok_or(GateError::NotActive)?;
        let battle_id = running.session.id;

        running.forced.store(true, Ordering::SeqCst);
        if let Some(controller) = &running.controller {
            if let Err(error) = controller.force_tie().await {
                tracing::warn!(%battle_id, error = %error, "Engine did not accept forced tie");
            }
        }
        self.conclude(&running.session, Some(Outcome::Tie), EndReason::Forced);
        Ok(battle_id)
    }

    fn validate(
        &self,
        request: &StartRequest,
        format: &str,
    ) -> Result<(Arc<dyn DecisionService>, Arc<dyn DecisionService>), GateError> {
        if format.is_empty()
            || format.len() > 64
            || !format
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(GateError::Validation(format!("invalid format id: {:?}", format)));
        }

        for (side, identity) in [(Side::P1, &request.p1), (Side::P2, &request.p2)] {
            for (field, value) in [("provider", &identity.provider), ("model", &identity.model)] {
                if value.trim().is_empty() {
                    return Err(GateError::Validation(format!("{} {} is empty", side, field)));
                }
                if value.contains(['|', '\n', '\r']) {
                    return Err(GateError::Validation(format!(
                        "{} {} contains reserved characters",
                        side, field
                    )));
                }
            }
        }
        // the engine reports winners by name
        if request.p1.label() == request.p2.label() {
            return Err(GateError::Validation(
                "p1 and p2 must have different identities".into(),
            ));
        }

        let resolve = |identity: &AgentIdentity| {
            self.registry.service_for(identity).map_err(|e| match e {
                DecisionError::UnknownProvider(p) => {
                    GateError::Validation(format!("unknown provider: {}", p))
                }
                other => GateError::Validation(other.to_string()),
            })
        };
        Ok((resolve(&request.p1)?, resolve(&request.p2)?))
    }

    /// Check-and-create in one critical section
    fn reserve(
        &self,
        format: &str,
        p1: AgentIdentity,
        p2: AgentIdentity,
    ) -> Result<Running, GateError> {
        let mut slot = self.slot.lock();
        if let Some(current) = slot.as_ref() {
            if current.session.status().is_live() {
                return Err(GateError::AlreadyActive {
                    battle_id: current.session.id,
                });
            }
        }
        let running = Running {
            session: Arc::new(BattleSession::new(format, p1, p2)),
            controller: None,
            cancel: CancellationToken::new(),
            forced: Arc::new(AtomicBool::new(false)),
        };
        *slot = Some(running.clone());
        Ok(running)
    }

    fn spawn_battle(
        &self,
        running: Running,
        handle: EngineHandle,
        p1_service: Arc<dyn DecisionService>,
        p2_service: Arc<dyn DecisionService>,
    ) {
        let EngineHandle {
            p1,
            p2,
            omniscient,
            controller: _,
        } = handle;
        let session = running.session.clone();

        let agent = |side, channel, service| {
            AgentLoop::new(side, session.clone(), channel, service, self.broadcaster.clone())
                .with_formatter(self.formatter.clone())
                .with_deadline(self.config.decision_timeout)
        };
        let p1_loop = tokio::spawn(agent(Side::P1, p1, p1_service).run(running.cancel.clone()));
        let p2_loop = tokio::spawn(agent(Side::P2, p2, p2_service).run(running.cancel.clone()));

        let pump = tokio::spawn(self.clone().pump(
            session.clone(),
            omniscient,
            running.cancel.clone(),
            running.forced.clone(),
        ));
        tokio::spawn(self.clone().supervise(session, pump, p1_loop, p2_loop));
    }

    /// Feed omniscient chunks into the log, the detector and the fan-out
    async fn pump(
        self,
        session: Arc<BattleSession>,
        mut omniscient: mpsc::Receiver<String>,
        cancel: CancellationToken,
        forced: Arc<AtomicBool>,
    ) {
        let battle_id = session.id;
        let mut detector = OutcomeDetector::new(PlayerNames::new(
            session.identity(Side::P1).label(),
            session.identity(Side::P2).label(),
        ));

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = omniscient.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                tracing::warn!(%battle_id, "Protocol stream closed before an outcome");
                self.conclude(&session, None, EndReason::EngineFailure);
                return;
            };

            let seq = session.append_chunk(chunk.as_str());
            let effects = detector.scan(&chunk);
            if let Some(turn) = effects.turn {
                if session.advance_turn(turn) {
                    tracing::debug!(%battle_id, turn, "Turn advanced");
                }
            }

            if effects.became_ready {
                session.mark_ready();
                self.broadcaster.publish(BattleEvent::SessionStarted {
                    battle_id,
                    format: session.format.clone(),
                    p1: session.identity(Side::P1).clone(),
                    p2: session.identity(Side::P2).clone(),
                    turn: session.turn(),
                    log: session.log(),
                });
            } else if session.is_ready() {
                self.broadcaster.publish(BattleEvent::ProtocolUpdate {
                    battle_id,
                    seq,
                    chunk,
                });
            }

            if let Some(detected) = effects.outcome {
                let outcome = detected.outcome();
                if outcome.is_none() {
                    tracing::warn!(%battle_id, "Win marker named an unknown player");
                }
                let reason = if forced.load(Ordering::SeqCst) {
                    EndReason::Forced
                } else {
                    EndReason::Natural
                };
                self.conclude(&session, outcome, reason);
                return;
            }
        }
    }

    /// Turn a closed side channel into a stream failure unless the protocol
    /// stream reports an outcome shortly after
    async fn supervise(
        self,
        session: Arc<BattleSession>,
        mut pump: JoinHandle<()>,
        mut p1_loop: JoinHandle<LoopExit>,
        mut p2_loop: JoinHandle<LoopExit>,
    ) {
        let failed = tokio::select! {
            _ = &mut pump => None,
            exit = &mut p1_loop => failed_side(Side::P1, exit),
            exit = &mut p2_loop => failed_side(Side::P2, exit),
        };
        let Some(side) = failed else {
            return;
        };

        if tokio::time::timeout(self.config.stream_grace, &mut pump)
            .await
            .is_err()
        {
            tracing::warn!(battle_id = %session.id, %side, "Side channel closed before an outcome");
            self.conclude(&session, None, EndReason::EngineFailure);
        }
    }

    /// Single termination path. Only the first call per session has any effect.
    fn conclude(&self, session: &Arc<BattleSession>, outcome: Option<Outcome>, reason: EndReason) -> bool {
        if !session.finish(outcome, reason) {
            return false;
        }

        let battle_id = session.id;
        let winner = outcome
            .and_then(|o| o.winner())
            .map(|side| session.identity(side).clone());
        tracing::info!(
            %battle_id,
            reason = reason.as_str(),
            turn = session.turn(),
            winner = winner.as_ref().map(|w| w.label()).unwrap_or_default(),
            "Battle ended"
        );

        self.broadcaster.publish(BattleEvent::SessionEnded {
            battle_id,
            outcome,
            winner,
            reason,
            turn: session.turn(),
        });

        let running = self
            .slot
            .lock()
            .as_ref()
            .filter(|r| r.session.id == battle_id)
            .cloned();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Some(controller) = running.controller {
                controller.shutdown();
            }
        }

        if let Some(sink) = self.sink.clone() {
            let record = BattleRecord::from_session(session);
            tokio::spawn(async move {
                match sink.persist(record).await {
                    Ok(()) => tracing::debug!(%battle_id, "Battle record persisted"),
                    Err(error) => {
                        tracing::error!(%battle_id, error = %error, "Failed to persist battle record")
                    }
                }
            });
        }
        true
    }
}

fn failed_side(
    side: Side,
    exit: Result<LoopExit, tokio::task::JoinError>,
) -> Option<Side> {
    match exit {
        Ok(exit) if exit.is_stream_failure() => Some(side),
        Ok(_) => None,
        Err(error) => {
            tracing::error!(%side, error = %error, "Agent loop panicked");
            Some(side)
        }
    }
}
