//! Integration tests for Colosseum
//!
//! These tests drive whole battles through the gate over the mock engine.

#[path = "../common/mod.rs"]
pub mod common;

pub mod decision_flow;
pub mod gate_lifecycle;
pub mod observer_replay;
pub mod persistence;
