//! Data persistence layer
//!
//! SQLite storage for completed battles.

mod battle_store;
mod database;
mod migrations;

pub use battle_store::BattleRecordStore;
pub use database::{Database, DatabaseError};
