//! HTTP request handlers for the battle API.

pub mod battle;
pub mod history;
