//! Completed battle records

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::database::DatabaseError;
use crate::battle::{
    AgentIdentity, BattleRecord, EndReason, OutcomeSink, Side, SideStats, SinkError,
};

const SELECT_COLUMNS: &str = "id, format, p1_provider, p1_model, p2_provider, p2_model, \
     winner_side, tie, end_reason, turns, started_at, ended_at, protocol_log, p1_stats, p2_stats";

/// Data access object for battle records
#[derive(Clone)]
pub struct BattleRecordStore {
    conn: Arc<Mutex<Connection>>,
}

/// Columns as stored, before parsing
struct StoredBattle {
    id: String,
    format: String,
    p1_provider: String,
    p1_model: String,
    p2_provider: String,
    p2_model: String,
    winner_side: Option<String>,
    tie: bool,
    end_reason: String,
    turns: u32,
    started_at: String,
    ended_at: String,
    protocol_log: String,
    p1_stats: Option<String>,
    p2_stats: Option<String>,
}

impl BattleRecordStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Insert a finished battle. Inserting the same id twice is a no-op.
    pub fn insert(&self, record: &BattleRecord) -> Result<bool, DatabaseError> {
        let log = serde_json::to_string(&record.log)
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?;
        let p1_stats = serde_json::to_string(&record.p1_stats)
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?;
        let p2_stats = serde_json::to_string(&record.p2_stats)
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?;

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO battles (id, format, p1_provider, p1_model, p2_provider, p2_model,
                 winner_side, tie, end_reason, turns, started_at, ended_at, protocol_log, p1_stats, p2_stats)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.id.to_string(),
                record.format,
                record.p1.provider,
                record.p1.model,
                record.p2.provider,
                record.p2.model,
                record.winner.map(|side| side.as_str()),
                record.tie as i32,
                record.end_reason.as_str(),
                record.turns,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                log,
                p1_stats,
                p2_stats,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get a battle by ID
    pub fn get(&self, id: Uuid) -> Result<Option<BattleRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM battles WHERE id = ?1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_stored(row)?.into_record()?)),
            None => Ok(None),
        }
    }

    /// Most recently ended battles first
    pub fn recent(&self, limit: usize) -> Result<Vec<BattleRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM battles ORDER BY ended_at DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let stored = stmt
            .query_map(params![limit as i64], Self::row_to_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stored.into_iter().map(StoredBattle::into_record).collect()
    }

    pub fn count(&self) -> Result<u64, DatabaseError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM battles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn row_to_stored(row: &Row) -> rusqlite::Result<StoredBattle> {
        Ok(StoredBattle {
            id: row.get(0)?,
            format: row.get(1)?,
            p1_provider: row.get(2)?,
            p1_model: row.get(3)?,
            p2_provider: row.get(4)?,
            p2_model: row.get(5)?,
            winner_side: row.get(6)?,
            tie: row.get::<_, i32>(7)? != 0,
            end_reason: row.get(8)?,
            turns: row.get(9)?,
            started_at: row.get(10)?,
            ended_at: row.get(11)?,
            protocol_log: row.get(12)?,
            p1_stats: row.get(13)?,
            p2_stats: row.get(14)?,
        })
    }
}

impl StoredBattle {
    fn into_record(self) -> Result<BattleRecord, DatabaseError> {
        let corrupt = |field: &str, err: &dyn std::fmt::Display| {
            DatabaseError::Corrupt(format!("{} ({}): {}", field, self.id, err))
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt("id", &e))?;
        let started_at = parse_timestamp(&self.started_at).map_err(|e| corrupt("started_at", &e))?;
        let ended_at = parse_timestamp(&self.ended_at).map_err(|e| corrupt("ended_at", &e))?;
        let log: Vec<String> =
            serde_json::from_str(&self.protocol_log).map_err(|e| corrupt("protocol_log", &e))?;
        let stats = |raw: &Option<String>| -> Result<SideStats, DatabaseError> {
            match raw {
                Some(json) => serde_json::from_str(json).map_err(|e| corrupt("stats", &e)),
                None => Ok(SideStats::default()),
            }
        };
        let p1_stats = stats(&self.p1_stats)?;
        let p2_stats = stats(&self.p2_stats)?;

        Ok(BattleRecord {
            id,
            format: self.format,
            p1: AgentIdentity::new(self.p1_provider, self.p1_model),
            p2: AgentIdentity::new(self.p2_provider, self.p2_model),
            winner: self.winner_side.as_deref().and_then(Side::parse),
            tie: self.tie,
            end_reason: EndReason::parse(&self.end_reason),
            turns: self.turns,
            started_at,
            ended_at,
            p1_stats,
            p2_stats,
            log,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl OutcomeSink for BattleRecordStore {
    async fn persist(&self, record: BattleRecord) -> Result<(), SinkError> {
        let store = self.clone();
        let battle_id = record.id;
        let inserted = tokio::task::spawn_blocking(move || store.insert(&record))
            .await
            .map_err(|e| SinkError(DatabaseError::Join(e.to_string()).to_string()))?
            .map_err(|e| SinkError(e.to_string()))?;
        if !inserted {
            tracing::warn!(%battle_id, "Battle record already stored");
        }
        Ok(())
    }
}
