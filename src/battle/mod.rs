//! Battle orchestration
//!
//! The gate owns the single current session and composes the pieces below:
//! two agent loops (one per side), the protocol pump with its outcome
//! detector, and the observer fan-out.

pub mod agent;
pub mod broadcast;
pub mod gate;
pub mod interpreter;
pub mod protocol;
pub mod request;
pub mod results;
pub mod session;
pub mod situation;
pub mod state;

pub use agent::{AgentLoop, Decision, LoopExit, DEFAULT_DECISION_TIMEOUT};
pub use broadcast::{BattleEvent, Broadcaster, ObserverSnapshot, DEFAULT_EVENT_BUFFER};
pub use gate::{BattleGate, GateConfig, GateError, StartRequest, DEFAULT_FORMAT};
pub use interpreter::{interpret, random_choice, ResponseInterpreter};
pub use protocol::{OutcomeDetector, PlayerNames, ProtocolReplay};
pub use request::{
    ChoiceConstraints, ChoiceKind, Command, MoveOption, RosterMember, SideRequest,
};
pub use results::{BattleRecord, OutcomeSink, SideStats, SinkError};
pub use session::BattleSession;
pub use situation::{PlainSituationFormatter, SituationFormatter, DEFAULT_LOG_TAIL_LINES};
pub use state::{AgentIdentity, BattleStatus, EndReason, Outcome, Side};
