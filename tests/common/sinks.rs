//! Outcome sinks for observing persistence

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colosseum::battle::{BattleRecord, OutcomeSink, SinkError};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Keeps every persisted record in memory
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<BattleRecord>>>,
    notify: Arc<Notify>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the call, then report a failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<BattleRecord> {
        self.records.lock().clone()
    }

    /// Wait until at least `count` records arrived
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<BattleRecord> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.records.lock().len() >= count {
                    return self.records();
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for persisted record")
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn persist(&self, record: BattleRecord) -> Result<(), SinkError> {
        self.records.lock().push(record);
        self.notify.notify_waiters();
        if self.fail {
            return Err(SinkError("disk full".into()));
        }
        Ok(())
    }
}
