//! Integration tests for starting, conflicting and force-ending battles

use std::sync::Arc;
use std::time::Duration;

use colosseum::battle::{
    AgentIdentity, BattleEvent, BattleStatus, EndReason, GateError, Outcome, OutcomeSink,
    StartRequest,
};
use colosseum::decision::{DecisionRegistry, MockDecisionService};
use colosseum::engine::MockEngine;

use super::common::*;

/// A fresh start returns an id and the gate reports an active battle
#[tokio::test]
async fn test_start_without_active_session() {
    let engine = MockEngine::new();
    let gate = gate_with(&engine, DecisionRegistry::new());

    let battle_id = gate.start(random_vs_random()).await.unwrap();
    let _battle = engine.take_match().unwrap();

    let status = gate.status();
    assert!(status.active);
    assert_eq!(status.battle_id, Some(battle_id));
    assert_eq!(status.status, Some(BattleStatus::Active));
    assert_eq!(status.p1.unwrap().label(), "random/one");

    gate.force_end().await.unwrap();
}

/// A second start while the first is live is rejected and changes nothing
#[tokio::test]
async fn test_second_start_conflicts() {
    let engine = MockEngine::new();
    let gate = gate_with(&engine, DecisionRegistry::new());

    let first = gate.start(random_vs_random()).await.unwrap();
    let _battle = engine.take_match().unwrap();

    let second = StartRequest::new(
        AgentIdentity::new("random", "three"),
        AgentIdentity::new("random", "four"),
    );
    match gate.start(second).await {
        Err(GateError::AlreadyActive { battle_id }) => assert_eq!(battle_id, first),
        other => panic!("expected conflict, got {:?}", other),
    }

    let status = gate.status();
    assert_eq!(status.battle_id, Some(first));
    assert_eq!(status.p1.unwrap().model, "one");
    assert_eq!(engine.captured_starts().len(), 1);

    gate.force_end().await.unwrap();
}

/// Concurrent starts racing on a slow engine produce exactly one battle
#[tokio::test]
async fn test_concurrent_starts_admit_one() {
    let engine = MockEngine::new().with_start_delay(Duration::from_millis(50));
    let gate = gate_with(&engine, DecisionRegistry::new());

    let attempts = (0..8).map(|_| {
        let gate = gate.clone();
        tokio::spawn(async move { gate.start(random_vs_random()).await })
    });
    let results = futures::future::join_all(attempts).await;

    let started = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(GateError::AlreadyActive { .. }))))
        .count();
    assert_eq!(started, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(engine.captured_starts().len(), 1);

    let _battle = engine.take_match().unwrap();
    gate.force_end().await.unwrap();
}

/// Force-ending asks the engine for a tie and ends exactly once
#[tokio::test]
async fn test_force_end_resolves_tie() {
    let engine = MockEngine::new();
    let gate = gate_with(&engine, DecisionRegistry::new());
    let mut events = gate.subscribe();

    let battle_id = gate.start(random_vs_random()).await.unwrap();
    let battle = engine.take_match().unwrap();

    assert_eq!(gate.force_end().await.unwrap(), battle_id);
    assert_eq!(battle.controller.force_tie_calls(), 1);

    let ended = wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await;
    match ended {
        BattleEvent::SessionEnded {
            outcome,
            winner,
            reason,
            ..
        } => {
            assert_eq!(outcome, Some(Outcome::Tie));
            assert!(winner.is_none());
            assert_eq!(reason, EndReason::Forced);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // the engine's own |tie| echo must not end the battle again
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!is_session_ended(&event), "battle ended twice");
    }

    assert!(!gate.status().active);
    assert!(matches!(gate.force_end().await, Err(GateError::NotActive)));
}

/// After a battle ends a new one can start
#[tokio::test]
async fn test_restart_after_end() {
    let engine = MockEngine::new();
    let gate = gate_with(&engine, DecisionRegistry::new());

    let first = gate.start(random_vs_random()).await.unwrap();
    let _first_battle = engine.take_match().unwrap();
    gate.force_end().await.unwrap();

    let second = gate.start(random_vs_random()).await.unwrap();
    let _second_battle = engine.take_match().unwrap();
    assert_ne!(first, second);
    assert_eq!(gate.status().battle_id, Some(second));
    gate.force_end().await.unwrap();
}

/// A failed engine start is announced, persisted and leaves the gate free
#[tokio::test]
async fn test_engine_start_failure_is_reported() {
    let engine = MockEngine::new().failing();
    let sink = RecordingSink::new();
    let gate = gate_with(&engine, DecisionRegistry::new())
        .with_sink(Arc::new(sink.clone()) as Arc<dyn OutcomeSink>);
    let mut events = gate.subscribe();

    assert!(matches!(
        gate.start(random_vs_random()).await,
        Err(GateError::Engine(_))
    ));
    assert!(!gate.status().active);
    let first = gate.current().unwrap().id;
    match wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await {
        BattleEvent::SessionEnded {
            battle_id,
            outcome,
            winner,
            reason,
            ..
        } => {
            assert_eq!(battle_id, first);
            assert!(outcome.is_none());
            assert!(winner.is_none());
            assert_eq!(reason, EndReason::EngineFailure);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(matches!(
        gate.start(random_vs_random()).await,
        Err(GateError::Engine(_))
    ));
    assert_eq!(engine.captured_starts().len(), 2);

    let records = sink.wait_for(2, Duration::from_secs(2)).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first);
    assert!(records
        .iter()
        .all(|r| r.end_reason == EndReason::EngineFailure && r.winner.is_none() && !r.tie));
}

/// A natural win resolves the winner by player name
#[tokio::test]
async fn test_natural_win() {
    let engine = MockEngine::new();
    let gate = gate_with(
        &engine,
        mock_registry(&MockDecisionService::new(), &MockDecisionService::new()),
    );
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    battle.push("|win|beta/model-b").await;

    let ended = wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await;
    match ended {
        BattleEvent::SessionEnded {
            outcome,
            winner,
            reason,
            turn,
            ..
        } => {
            assert_eq!(outcome, Some(Outcome::Win { side: colosseum::Side::P2 }));
            assert_eq!(winner.unwrap().provider, BETA);
            assert_eq!(reason, EndReason::Natural);
            assert_eq!(turn, 3);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(battle.controller.force_tie_calls(), 0);
}
