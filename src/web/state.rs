//! Shared state for the web server.

use crate::battle::BattleGate;
use crate::data::BattleRecordStore;

/// State handed to every handler.
#[derive(Clone)]
pub struct WebAppState {
    gate: BattleGate,
    records: Option<BattleRecordStore>,
}

impl WebAppState {
    pub fn new(gate: BattleGate) -> Self {
        Self {
            gate,
            records: None,
        }
    }

    /// Attach the persisted battle history.
    pub fn with_records(mut self, records: BattleRecordStore) -> Self {
        self.records = Some(records);
        self
    }

    pub fn gate(&self) -> &BattleGate {
        &self.gate
    }

    pub fn records(&self) -> Option<&BattleRecordStore> {
        self.records.as_ref()
    }
}
