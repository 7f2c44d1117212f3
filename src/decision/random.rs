use async_trait::async_trait;

use super::{ChunkSender, DecisionError, DecisionReply, DecisionService};

/// Provider that never answers, so every decision takes the random fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDecisionService;

#[async_trait]
impl DecisionService for RandomDecisionService {
    fn provider(&self) -> &str {
        "random"
    }

    async fn decide(
        &self,
        _situation: &str,
        _chunks: Option<ChunkSender>,
    ) -> Result<DecisionReply, DecisionError> {
        Err(DecisionError::Declined)
    }
}
