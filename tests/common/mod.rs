//! Shared test utilities for Colosseum
//!
//! This module provides common helpers for integration tests:
//! - Gate construction over the mock engine
//! - Request and protocol fixtures
//! - A recording outcome sink and event helpers

pub mod battle_fixtures;
pub mod sinks;

pub use battle_fixtures::*;
pub use sinks::RecordingSink;
