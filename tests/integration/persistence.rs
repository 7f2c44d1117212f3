//! Integration tests for persisting finished battles

use std::sync::Arc;
use std::time::Duration;

use colosseum::battle::{BattleEvent, EndReason, Outcome, OutcomeSink, Side};
use colosseum::data::{BattleRecordStore, Database};
use colosseum::decision::{MockDecisionService, MockReply};
use colosseum::engine::MockEngine;
use tempfile::tempdir;

use super::common::*;

/// A finished battle lands in SQLite with its stats and full log
#[tokio::test]
async fn test_finished_battle_is_stored() {
    let dir = tempdir().unwrap();
    let database = Database::open(dir.path().join("colosseum.db")).unwrap();
    let store = BattleRecordStore::new(database.connection());

    let alpha = MockDecisionService::new().with_default(MockReply::with_reasoning("move 1", "fast"));
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()))
        .with_sink(Arc::new(store.clone()) as Arc<dyn OutcomeSink>);
    let mut events = gate.subscribe();

    let battle_id = gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    battle.p1.request(active_request()).await;
    battle.p1.next_command().await.unwrap();
    battle.p2.request(active_request()).await;
    battle.p2.next_command().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    battle.push("|win|alpha/model-a").await;
    wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await;

    let record = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(record) = store.get(battle_id).unwrap() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record was not persisted");

    assert_eq!(record.winner, Some(Side::P1));
    assert!(!record.tie);
    assert_eq!(record.end_reason, EndReason::Natural);
    assert_eq!(record.turns, 3);
    assert_eq!(record.log.len(), 11);
    assert_eq!(record.p1_stats.decisions, 1);
    assert_eq!(record.p1_stats.fallbacks, 0);
    assert_eq!(record.p2_stats.fallbacks, 1);
    assert!(record.ended_at >= record.started_at);
    assert_eq!(store.recent(5).unwrap().len(), 1);
}

/// A forced end is stored as a tie
#[tokio::test]
async fn test_forced_end_is_stored_as_tie() {
    let sink = RecordingSink::new();
    let engine = MockEngine::new();
    let gate = gate_with(
        &engine,
        mock_registry(&MockDecisionService::new(), &MockDecisionService::new()),
    )
    .with_sink(Arc::new(sink.clone()) as Arc<dyn OutcomeSink>);

    let battle_id = gate.start(alpha_vs_beta()).await.unwrap();
    let _battle = engine.take_match().unwrap();
    gate.force_end().await.unwrap();

    let records = sink.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(records[0].id, battle_id);
    assert!(records[0].tie);
    assert!(records[0].winner.is_none());
    assert_eq!(records[0].end_reason, EndReason::Forced);
}

/// A failing sink does not change what observers saw
#[tokio::test]
async fn test_persistence_failure_is_not_visible() {
    let sink = RecordingSink::failing();
    let engine = MockEngine::new();
    let gate = gate_with(
        &engine,
        mock_registry(&MockDecisionService::new(), &MockDecisionService::new()),
    )
    .with_sink(Arc::new(sink.clone()) as Arc<dyn OutcomeSink>);
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    battle.push("|win|beta/model-b").await;

    match wait_for_event(&mut events, Duration::from_secs(2), is_session_ended).await {
        BattleEvent::SessionEnded { outcome, .. } => {
            assert_eq!(outcome, Some(Outcome::Win { side: Side::P2 }));
        }
        other => panic!("unexpected event {:?}", other),
    }
    sink.wait_for(1, Duration::from_secs(2)).await;

    let snapshot = gate.status();
    assert!(!snapshot.active);
    assert_eq!(snapshot.winner.unwrap().provider, BETA);

    // the slot is free again
    gate.start(alpha_vs_beta()).await.unwrap();
    let _next = engine.take_match().unwrap();
    gate.force_end().await.unwrap();
}
