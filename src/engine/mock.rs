//! Mock battle engine for deterministic testing
//!
//! Implements `BattleEngine` without spawning a simulator. Each started match
//! is parked as a [`MockMatch`] which the test drives by hand: push requests
//! to either side, read back the commands the agents submitted, and feed
//! protocol chunks to the omniscient stream.
//!
//! # Example
//! ```no_run
//! use colosseum::engine::MockEngine;
//!
//! # async fn demo(engine: MockEngine) {
//! // after the gate has started a battle on `engine`
//! let mut m = engine.take_match().expect("a match was started");
//! m.push("|switch|p1a: Pikachu|Pikachu, L50|100/100").await;
//! let command = m.p1.next_command().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BattleEngine, EngineController, EngineError, EngineHandle, EngineMessage, SideChannel};
use crate::battle::{AgentIdentity, Command, Side, SideRequest};

/// Arguments of one `start_match` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStart {
    pub format: String,
    pub p1: AgentIdentity,
    pub p2: AgentIdentity,
}

/// Mock engine for testing
#[derive(Clone, Default)]
pub struct MockEngine {
    fail_on_start: bool,
    start_delay: Duration,
    captured_starts: Arc<Mutex<Vec<CapturedStart>>>,
    matches: Arc<Mutex<VecDeque<MockMatch>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `start_match` to fail
    pub fn failing(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    /// Delay `start_match` (exercises concurrent start attempts)
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// All start_match calls so far
    pub fn captured_starts(&self) -> Vec<CapturedStart> {
        self.captured_starts.lock().clone()
    }

    /// Take the oldest match not yet claimed by the test
    pub fn take_match(&self) -> Option<MockMatch> {
        self.matches.lock().pop_front()
    }
}

#[async_trait]
impl BattleEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start_match(
        &self,
        format: &str,
        p1: &AgentIdentity,
        p2: &AgentIdentity,
    ) -> Result<EngineHandle, EngineError> {
        self.captured_starts.lock().push(CapturedStart {
            format: format.to_string(),
            p1: p1.clone(),
            p2: p2.clone(),
        });

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_on_start {
            return Err(EngineError::BinaryNotFound("mock-failure".into()));
        }

        let (p1_side, p1_channel) = MockSide::pair();
        let (p2_side, p2_channel) = MockSide::pair();
        let (omni_tx, omni_rx) = mpsc::channel(256);
        let controller = Arc::new(MockController::new(omni_tx.downgrade()));

        self.matches.lock().push_back(MockMatch {
            p1: p1_side,
            p2: p2_side,
            omniscient: Some(omni_tx),
            controller: controller.clone(),
        });

        Ok(EngineHandle {
            p1: p1_channel,
            p2: p2_channel,
            omniscient: omni_rx,
            controller,
        })
    }
}

/// Test-facing end of a running mock match
pub struct MockMatch {
    pub p1: MockSide,
    pub p2: MockSide,
    omniscient: Option<mpsc::Sender<String>>,
    pub controller: Arc<MockController>,
}

impl MockMatch {
    /// Feed one chunk to the omniscient stream
    pub async fn push(&self, chunk: impl Into<String>) {
        if let Some(tx) = &self.omniscient {
            let _ = tx.send(chunk.into()).await;
        }
    }

    /// Feed several chunks in order
    pub async fn push_all<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for chunk in chunks {
            self.push(chunk).await;
        }
    }

    /// Drop the omniscient sender so the stream terminates
    pub fn close_stream(&mut self) {
        self.omniscient = None;
    }

    /// Close one side's request channel, as a crashed player process would
    pub fn disconnect_side(&mut self, side: Side) {
        let (detached, _) = MockSide::pair();
        match side {
            Side::P1 => self.p1 = detached,
            Side::P2 => self.p2 = detached,
        }
    }
}

/// Test-facing end of one side's channel
pub struct MockSide {
    requests: mpsc::Sender<EngineMessage>,
    commands: mpsc::Receiver<Command>,
}

impl MockSide {
    fn pair() -> (Self, SideChannel) {
        let (req_tx, req_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (
            Self {
                requests: req_tx,
                commands: cmd_rx,
            },
            SideChannel::new(req_rx, cmd_tx),
        )
    }

    pub async fn request(&self, request: SideRequest) {
        let _ = self.requests.send(EngineMessage::Request(request)).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        let _ = self.requests.send(EngineMessage::Error(message.into())).await;
    }

    /// Next command the agent submitted, None once the agent loop is gone
    pub async fn next_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    /// A command already submitted, without waiting
    pub fn try_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }
}

/// Controller that records calls and answers `force_tie` with `|tie|`
pub struct MockController {
    omniscient: mpsc::WeakSender<String>,
    force_tie_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl MockController {
    fn new(omniscient: mpsc::WeakSender<String>) -> Self {
        Self {
            omniscient,
            force_tie_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    pub fn force_tie_calls(&self) -> usize {
        self.force_tie_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineController for MockController {
    async fn force_tie(&self) -> Result<(), EngineError> {
        self.force_tie_calls.fetch_add(1, Ordering::SeqCst);
        let tx = self.omniscient.upgrade().ok_or(EngineError::ChannelClosed)?;
        tx.send("|tie|".to_string())
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }
}
