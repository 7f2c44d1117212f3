pub mod battle;
pub mod config;
pub mod data;
pub mod decision;
pub mod engine;
pub mod util;
pub mod web;

pub use battle::{
    AgentIdentity, BattleEvent, BattleGate, BattleRecord, BattleSession, Broadcaster, GateError,
    Outcome, Side, StartRequest,
};
pub use config::Config;
pub use data::{BattleRecordStore, Database};
pub use decision::{DecisionRegistry, DecisionService};
pub use engine::{BattleEngine, EngineHandle};
