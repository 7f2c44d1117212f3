//! Gate, request and protocol fixtures

use std::sync::Arc;
use std::time::Duration;

use colosseum::battle::{
    AgentIdentity, BattleEvent, BattleGate, Broadcaster, GateConfig, MoveOption, RosterMember,
    SideRequest, StartRequest,
};
use colosseum::decision::{DecisionRegistry, DecisionService, MockDecisionService};
use colosseum::engine::MockEngine;
use tokio::sync::broadcast;

pub const ALPHA: &str = "alpha";
pub const BETA: &str = "beta";

/// Registry with one mock service per side, registered as `alpha` and `beta`
pub fn mock_registry(
    alpha: &MockDecisionService,
    beta: &MockDecisionService,
) -> DecisionRegistry {
    let mut registry = DecisionRegistry::new();
    registry.register_service(ALPHA, Arc::new(alpha.clone()) as Arc<dyn DecisionService>);
    registry.register_service(BETA, Arc::new(beta.clone()) as Arc<dyn DecisionService>);
    registry
}

pub fn test_gate_config() -> GateConfig {
    GateConfig {
        stream_grace: Duration::from_millis(200),
        ..GateConfig::default()
    }
}

pub fn gate_with(engine: &MockEngine, registry: DecisionRegistry) -> BattleGate {
    BattleGate::new(
        Arc::new(engine.clone()),
        registry,
        Broadcaster::new(256),
        test_gate_config(),
    )
}

/// `alpha/model-a` vs `beta/model-b`
pub fn alpha_vs_beta() -> StartRequest {
    StartRequest::new(
        AgentIdentity::new(ALPHA, "model-a"),
        AgentIdentity::new(BETA, "model-b"),
    )
}

pub fn random_vs_random() -> StartRequest {
    StartRequest::new(
        AgentIdentity::new("random", "one"),
        AgentIdentity::new("random", "two"),
    )
}

pub fn roster() -> Vec<RosterMember> {
    vec![
        RosterMember::new("Pikachu").active(),
        RosterMember::new("Charizard"),
        RosterMember::new("Snorlax").fainted(),
        RosterMember::new("Gengar"),
    ]
}

/// Four moves, the second one disabled
pub fn active_request_with_disabled_second() -> SideRequest {
    SideRequest::ActiveChoice {
        moves: vec![
            MoveOption::new("Thunderbolt"),
            MoveOption::new("Volt Tackle").disabled(),
            MoveOption::new("Iron Tail"),
            MoveOption::new("Quick Attack"),
        ],
        trapped: false,
        roster: roster(),
    }
}

pub fn active_request() -> SideRequest {
    SideRequest::ActiveChoice {
        moves: vec![MoveOption::new("Thunderbolt"), MoveOption::new("Iron Tail")],
        trapped: false,
        roster: roster(),
    }
}

pub fn team_preview_request() -> SideRequest {
    SideRequest::TeamPreview { roster: roster() }
}

/// Ten chunks covering three turns, with the first switch-ins in chunk 2
pub fn ten_chunks_three_turns() -> Vec<String> {
    [
        "|init|battle\n|player|p1|alpha/model-a\n|player|p2|beta/model-b",
        "|gametype|singles\n|gen|9",
        "|start\n|switch|p1a: Pikachu|Pikachu, L50|100/100\n|switch|p2a: Eevee|Eevee, L50|100/100",
        "|turn|1",
        "|move|p1a: Pikachu|Thunderbolt|p2a: Eevee\n|-damage|p2a: Eevee|40/100",
        "|turn|2",
        "|switch|p2a: Gengar|Gengar, L50|100/100",
        "|move|p1a: Pikachu|Iron Tail|p2a: Gengar",
        "|turn|3",
        "|switch|p1a: Charizard|Charizard, L50|100/100",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Receive events until one matches, failing after `timeout`
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<BattleEvent>,
    timeout: Duration,
    mut matches: F,
) -> BattleEvent
where
    F: FnMut(&BattleEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_session_ended(event: &BattleEvent) -> bool {
    matches!(event, BattleEvent::SessionEnded { .. })
}
