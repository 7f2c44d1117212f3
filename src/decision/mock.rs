//! Scripted decision service for deterministic testing
//!
//! Replies are popped from a queue, one per `decide` call; once the queue is
//! empty the default reply is used. Every situation is captured for later
//! verification, and the number of calls still in flight is tracked so tests
//! can check that abandoned calls really were cancelled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChunkSender, DecisionError, DecisionReply, DecisionService};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream `chunks` (when streaming), then answer
    Answer {
        reply: DecisionReply,
        chunks: Vec<String>,
    },
    /// Fail with a request error
    Fail(String),
    /// Never answer
    Hang,
}

impl MockReply {
    pub fn text(command: impl Into<String>) -> Self {
        MockReply::Answer {
            reply: DecisionReply::new(command),
            chunks: Vec::new(),
        }
    }

    pub fn with_reasoning(command: impl Into<String>, reasoning: impl Into<String>) -> Self {
        MockReply::Answer {
            reply: DecisionReply::new(command).with_reasoning(reasoning),
            chunks: Vec::new(),
        }
    }

    pub fn streamed(command: impl Into<String>, chunks: &[&str]) -> Self {
        MockReply::Answer {
            reply: DecisionReply::new(command),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct MockDecisionService {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    default_reply: MockReply,
    delay: Duration,
    streaming: bool,
    captured_situations: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for MockDecisionService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDecisionService {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: MockReply::Fail("no scripted reply".into()),
            delay: Duration::ZERO,
            streaming: false,
            captured_situations: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue replies, consumed in order
    pub fn with_replies(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.replies.lock().extend(replies);
        self
    }

    /// Reply used once the queue is drained
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Wait this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Advertise incremental output
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn situations(&self) -> Vec<String> {
        self.captured_situations.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_situations.lock().len()
    }

    /// Calls started but neither finished nor dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DecisionService for MockDecisionService {
    fn provider(&self) -> &str {
        "mock"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn decide(
        &self,
        situation: &str,
        chunks: Option<ChunkSender>,
    ) -> Result<DecisionReply, DecisionError> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.captured_situations.lock().push(situation.to_string());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            MockReply::Answer {
                reply,
                chunks: parts,
            } => {
                if let Some(tx) = chunks.filter(|_| self.streaming) {
                    for part in parts {
                        let _ = tx.send(part).await;
                    }
                }
                Ok(reply)
            }
            MockReply::Fail(message) => Err(DecisionError::Request(message)),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(DecisionError::Declined)
            }
        }
    }
}
