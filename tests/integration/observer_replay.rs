//! Integration tests for the protocol log, observers and stream failures

use std::sync::Arc;
use std::time::Duration;

use colosseum::battle::{
    BattleEvent, EndReason, Outcome, OutcomeSink, PlayerNames, ProtocolReplay, Side,
};
use colosseum::decision::DecisionRegistry;
use colosseum::engine::MockEngine;

use super::common::*;

fn players() -> PlayerNames {
    PlayerNames::new("alpha/model-a", "beta/model-b")
}

fn alpha_beta_gate(engine: &MockEngine) -> colosseum::BattleGate {
    let mut registry = DecisionRegistry::new();
    registry.register_service(ALPHA, Arc::new(colosseum::decision::RandomDecisionService));
    registry.register_service(BETA, Arc::new(colosseum::decision::RandomDecisionService));
    gate_with(engine, registry)
}

/// An observer joining after ten chunks rebuilds the same state as one
/// that watched from the start
#[tokio::test]
async fn test_late_observer_replays_to_same_state() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut early = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;

    // early observer: session-started prefix plus every later update
    let mut early_log = Vec::new();
    loop {
        let event = wait_for_event(&mut early, Duration::from_secs(2), |e| {
            matches!(
                e,
                BattleEvent::SessionStarted { .. } | BattleEvent::ProtocolUpdate { .. }
            )
        })
        .await;
        match event {
            BattleEvent::SessionStarted { log, turn, .. } => {
                assert_eq!(turn, 0);
                assert_eq!(log.len(), 3);
                early_log = log;
            }
            BattleEvent::ProtocolUpdate { seq, chunk, .. } => {
                assert_eq!(seq, early_log.len(), "gap in protocol updates");
                early_log.push(chunk);
                if seq == 9 {
                    break;
                }
            }
            _ => unreachable!(),
        }
    }

    let snapshot = gate.status();
    assert_eq!(snapshot.turn, 3);
    assert_eq!(snapshot.log.len(), 10);
    assert_eq!(snapshot.observers, 1);
    assert_eq!(snapshot.log, early_log);

    let late = ProtocolReplay::replay(&snapshot.log, players());
    let live = ProtocolReplay::replay(&early_log, players());
    assert_eq!(late.turn, 3);
    assert_eq!(late, live);
    assert_eq!(late.active(Side::P1), Some("Charizard"));
    assert_eq!(late.active(Side::P2), Some("Gengar"));

    gate.force_end().await.unwrap();
}

/// Chunks before the first switch-in are logged but not broadcast
#[tokio::test]
async fn test_session_started_waits_for_first_switch() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle.push("|init|battle").await;
    battle.push("|gen|9").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(gate.current().unwrap().log_len(), 2);

    battle.push("|switch|p1a: Pikachu|Pikachu, L50|100/100").await;
    match wait_for_event(&mut events, Duration::from_secs(2), |_| true).await {
        BattleEvent::SessionStarted { log, .. } => assert_eq!(log.len(), 3),
        other => panic!("expected session_started, got {:?}", other),
    }
    gate.force_end().await.unwrap();
}

/// A stale turn marker never moves the turn backwards
#[tokio::test]
async fn test_turn_is_monotonic() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle
        .push_all([
            "|switch|p1a: Pikachu|Pikachu, L50|100/100",
            "|turn|5",
            "|turn|2",
            "|turn|4",
        ])
        .await;
    wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, BattleEvent::ProtocolUpdate { seq: 3, .. })
    })
    .await;

    let snapshot = gate.status();
    assert_eq!(snapshot.turn, 5);
    assert_eq!(ProtocolReplay::replay(&snapshot.log, players()).turn, 5);
    gate.force_end().await.unwrap();
}

/// A duplicated win marker ends the battle once and persists once
#[tokio::test]
async fn test_duplicate_win_is_idempotent() {
    let engine = MockEngine::new();
    let sink = RecordingSink::new();
    let gate = alpha_beta_gate(&engine).with_sink(Arc::new(sink.clone()) as Arc<dyn OutcomeSink>);
    let mut events = gate.subscribe();

    let battle_id = gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    battle.push("|win|alpha/model-a\n|win|alpha/model-a").await;
    battle.push("|win|alpha/model-a").await;

    let ended = wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await;
    assert_eq!(ended.battle_id(), battle_id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!is_session_ended(&event), "battle ended twice");
    }

    let records = sink.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, battle_id);
    assert_eq!(record.winner, Some(Side::P1));
    assert_eq!(record.winner_identity().unwrap().provider, ALPHA);
    assert_eq!(record.end_reason, EndReason::Natural);
    assert_eq!(record.turns, 3);
    assert_eq!(record.log.len(), 11);

    let session = gate.current().unwrap();
    assert_eq!(session.outcome(), Some(Outcome::Win { side: Side::P1 }));
    let replay = ProtocolReplay::replay(&session.log(), players());
    assert_eq!(replay.outcome, session.outcome());
    assert_eq!(replay.turn, session.turn());
}

/// The protocol stream closing mid-battle ends it without a winner
#[tokio::test]
async fn test_protocol_stream_failure_ends_battle() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();
    battle.push("|switch|p1a: Pikachu|Pikachu, L50|100/100").await;
    battle.close_stream();

    match wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await {
        BattleEvent::SessionEnded {
            outcome,
            winner,
            reason,
            ..
        } => {
            assert!(outcome.is_none());
            assert!(winner.is_none());
            assert_eq!(reason, EndReason::EngineFailure);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!gate.status().active);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(battle.controller.shutdown_calls(), 1);
}

/// A side channel closing without an outcome ends the battle after the grace period
#[tokio::test]
async fn test_side_channel_failure_ends_battle() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();
    battle.disconnect_side(Side::P1);

    match wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await {
        BattleEvent::SessionEnded {
            outcome, reason, ..
        } => {
            assert!(outcome.is_none());
            assert_eq!(reason, EndReason::EngineFailure);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Side channels closing just before the win marker do not mask the outcome
#[tokio::test]
async fn test_win_during_grace_period_is_natural() {
    let engine = MockEngine::new();
    let gate = alpha_beta_gate(&engine);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    battle.disconnect_side(Side::P1);
    battle.disconnect_side(Side::P2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    battle.push("|win|beta/model-b").await;

    match wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await {
        BattleEvent::SessionEnded {
            outcome, reason, ..
        } => {
            assert_eq!(outcome, Some(Outcome::Win { side: Side::P2 }));
            assert_eq!(reason, EndReason::Natural);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
