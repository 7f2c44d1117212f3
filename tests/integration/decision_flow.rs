//! Integration tests for agent decisions driven through the gate

use std::collections::HashSet;
use std::time::Duration;

use colosseum::battle::{BattleEvent, Command, Side, SideRequest};
use colosseum::decision::{DecisionRegistry, MockDecisionService, MockReply};
use colosseum::engine::MockEngine;

use super::common::*;

fn is_decision(event: &BattleEvent) -> bool {
    matches!(event, BattleEvent::Decision { .. })
}

/// "move 2" against a disabled slot 2 never plays move 2
#[tokio::test]
async fn test_disabled_move_falls_back_to_remaining_legal_set() {
    let alpha = MockDecisionService::new().with_default(MockReply::text("move 2"));
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    let legal: HashSet<Command> = [
        Command::Move(1),
        Command::Move(3),
        Command::Move(4),
        Command::Switch(2),
        Command::Switch(4),
    ]
    .into_iter()
    .collect();
    let mut seen = HashSet::new();
    for _ in 0..40 {
        battle.p1.request(active_request_with_disabled_second()).await;
        let command = battle.p1.next_command().await.unwrap();
        assert_ne!(command, Command::Move(2));
        assert!(legal.contains(&command), "illegal fallback {}", command);
        seen.insert(command);

        match wait_for_event(&mut events, Duration::from_secs(2), is_decision).await {
            BattleEvent::Decision { side, fallback, .. } => {
                assert_eq!(side, Side::P1);
                assert!(fallback);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    // uniform over five options; 40 draws all landing on one is vanishingly unlikely
    assert!(seen.len() > 1);

    // stats are recorded just after the event goes out
    tokio::time::sleep(Duration::from_millis(20)).await;
    let session = gate.current().unwrap();
    assert_eq!(session.stats(Side::P1).decisions, 40);
    assert_eq!(session.stats(Side::P1).fallbacks, 40);
    gate.force_end().await.unwrap();
}

/// A service that never answers is cut off at the 30s deadline
#[tokio::test(start_paused = true)]
async fn test_silent_service_hits_deadline() {
    let alpha = MockDecisionService::new().with_default(MockReply::Hang);
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(active_request()).await;
    let command = battle.p1.next_command().await.unwrap();
    assert!(matches!(command, Command::Move(1 | 2) | Command::Switch(2 | 4)));

    match wait_for_event(&mut events, Duration::from_secs(120), is_decision).await {
        BattleEvent::Decision {
            latency_ms,
            fallback,
            ..
        } => {
            assert!(fallback);
            assert!((30_000..30_100).contains(&latency_ms), "latency {}", latency_ms);
        }
        other => panic!("unexpected event {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(alpha.call_count(), 1);
    assert_eq!(alpha.in_flight(), 0);
    gate.force_end().await.unwrap();
}

/// Team preview accepts "default" and a literal lead order
#[tokio::test]
async fn test_team_preview_answers() {
    let alpha = MockDecisionService::new()
        .with_replies([MockReply::text("default"), MockReply::text("314265")]);
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(team_preview_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Default);

    battle.p1.request(team_preview_request()).await;
    assert_eq!(
        battle.p1.next_command().await.unwrap(),
        Command::Team("314265".into())
    );
    assert_eq!(gate.current().unwrap().stats(Side::P1).fallbacks, 0);
    gate.force_end().await.unwrap();
}

/// Reasoning fragments are forwarded before the decision, ending in one done marker
#[tokio::test]
async fn test_streamed_reasoning_reaches_observers() {
    let alpha = MockDecisionService::new()
        .with_streaming()
        .with_replies([MockReply::streamed("move 1", &["Thunderbolt ", "is strong"])]);
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(active_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Move(1));

    let mut chunks = Vec::new();
    let mut done_markers = 0;
    loop {
        let event = wait_for_event(&mut events, Duration::from_secs(2), |e| {
            matches!(e, BattleEvent::ReasoningChunk { .. } | BattleEvent::Decision { .. })
        })
        .await;
        match event {
            BattleEvent::ReasoningChunk { chunk, done, .. } => {
                if done {
                    done_markers += 1;
                } else {
                    assert_eq!(done_markers, 0, "chunk after done marker");
                    chunks.push(chunk);
                }
            }
            BattleEvent::Decision {
                command, fallback, ..
            } => {
                assert_eq!(command, "move 1");
                assert!(!fallback);
                break;
            }
            _ => unreachable!(),
        }
    }
    assert_eq!(chunks.concat(), "Thunderbolt is strong");
    assert_eq!(done_markers, 1);
    gate.force_end().await.unwrap();
}

/// A rejected command is followed by the engine's corrected request only
#[tokio::test]
async fn test_unavailable_choice_waits_for_corrected_request() {
    let alpha = MockDecisionService::new()
        .with_replies([MockReply::text("move 1"), MockReply::text("switch 2")]);
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(active_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Move(1));

    battle
        .p1
        .error("[Unavailable choice] Can't move: Pikachu's Thunderbolt is disabled")
        .await;
    battle.p1.request(active_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Switch(2));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(battle.p1.try_command().is_none());
    assert_eq!(alpha.call_count(), 2);
    gate.force_end().await.unwrap();
}

/// An invalid team order is answered once with a legal fallback
#[tokio::test]
async fn test_invalid_team_order_is_replaced() {
    let alpha = MockDecisionService::new().with_replies([MockReply::text("team 111111")]);
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(team_preview_request()).await;
    assert_eq!(
        battle.p1.next_command().await.unwrap(),
        Command::Team("111111".into())
    );

    battle
        .p1
        .error("[Invalid choice] Can't choose for Team Preview: The Pokémon in slot 1 can only switch in once")
        .await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Default);

    let fallback = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, BattleEvent::Decision { fallback: true, .. })
    })
    .await;
    match fallback {
        BattleEvent::Decision { side, command, .. } => {
            assert_eq!(side, Side::P1);
            assert_eq!(command, "default");
        }
        other => panic!("unexpected event {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(battle.p1.try_command().is_none());
    assert_eq!(alpha.call_count(), 1);
    let stats = gate.current().unwrap().stats(Side::P1);
    assert_eq!(stats.decisions, 2);
    assert_eq!(stats.fallbacks, 1);
    gate.force_end().await.unwrap();
}

/// Wait requests never reach the decision service
#[tokio::test]
async fn test_wait_requests_produce_no_command() {
    let alpha = MockDecisionService::new().with_default(MockReply::text("move 1"));
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &MockDecisionService::new()));

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle.p1.request(SideRequest::Wait).await;
    battle.p1.request(active_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Move(1));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(battle.p1.try_command().is_none());
    assert_eq!(alpha.call_count(), 1);
    gate.force_end().await.unwrap();
}

/// Both sides decide independently and see the protocol log in their prompt
#[tokio::test]
async fn test_sides_decide_independently() {
    let alpha = MockDecisionService::new().with_default(MockReply::text("move 2"));
    let beta = MockDecisionService::new().with_default(MockReply::text("Charizard, go!"));
    let engine = MockEngine::new();
    let gate = gate_with(&engine, mock_registry(&alpha, &beta));
    let mut events = gate.subscribe();

    gate.start(alpha_vs_beta()).await.unwrap();
    let mut battle = engine.take_match().unwrap();
    battle.push_all(ten_chunks_three_turns()).await;
    wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, BattleEvent::ProtocolUpdate { seq: 9, .. })
    })
    .await;

    battle.p2.request(active_request()).await;
    battle.p1.request(active_request()).await;
    assert_eq!(battle.p1.next_command().await.unwrap(), Command::Move(2));
    assert_eq!(battle.p2.next_command().await.unwrap(), Command::Switch(2));

    let situation = &alpha.situations()[0];
    assert!(situation.starts_with("You are player p1."));
    assert!(situation.contains("|turn|3"));
    assert!(beta.situations()[0].starts_with("You are player p2."));
    gate.force_end().await.unwrap();
}

/// The random provider always plays a legal fallback
#[tokio::test]
async fn test_random_provider_plays_fallbacks() {
    let engine = MockEngine::new();
    let gate = gate_with(&engine, DecisionRegistry::new());

    gate.start(random_vs_random()).await.unwrap();
    let mut battle = engine.take_match().unwrap();

    battle
        .p2
        .request(SideRequest::ForcedSwitch { roster: roster() })
        .await;
    let command = battle.p2.next_command().await.unwrap();
    assert!(matches!(command, Command::Switch(2 | 4)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gate.current().unwrap().stats(Side::P2).fallbacks, 1);
    gate.force_end().await.unwrap();
}
