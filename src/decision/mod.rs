//! Decision services
//!
//! A decision service turns a natural-language description of the situation
//! into a reply containing (hopefully) a command. Nothing here validates the
//! command; the battle layer interprets the text against the request's
//! constraints and falls back to a random legal choice when needed.

pub mod command;
pub mod mock;
pub mod openai;
pub mod random;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::battle::AgentIdentity;
use crate::config::{ProviderConfig, ProviderKind};

pub use command::CommandDecisionService;
pub use mock::{MockDecisionService, MockReply};
pub use openai::OpenAiDecisionService;
pub use random::RandomDecisionService;

/// Sink for incremental reasoning fragments
pub type ChunkSender = mpsc::Sender<String>;

/// Instructions sent ahead of every situation
pub const SYSTEM_PROMPT: &str = "You are playing a Pokemon battle. Read the situation and pick \
exactly one of the listed options. Respond ONLY with JSON (no markdown): \
{\"command\": \"move 1\", \"reasoning\": \"one or two sentences\"}. \
Valid commands look like \"move N\", \"switch N\", \"default\" or a team order such as \"123456\".";

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Provider misconfigured: {0}")]
    Config(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Provider returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Process failed: {0}")]
    Process(String),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Provider declined to answer")]
    Declined,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DecisionError {
    fn from(err: reqwest::Error) -> Self {
        DecisionError::Request(err.to_string())
    }
}

/// Final answer of a decision call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReply {
    /// Free-form command text, interpreted later
    pub command: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl DecisionReply {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Build a reply from raw model output.
    ///
    /// Uses the embedded `{"command", "reasoning"}` object when one parses,
    /// otherwise the whole text becomes the command text.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if start < end {
                if let Ok(reply) = serde_json::from_str::<DecisionReply>(&trimmed[start..=end]) {
                    return reply;
                }
            }
        }
        Self::new(trimmed)
    }
}

/// Capability an agent loop is polymorphic over
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Provider name for logs
    fn provider(&self) -> &str;

    /// Whether `decide` forwards reasoning fragments to the chunk sender
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Answer one situation. Fragments go to `chunks` as they arrive.
    async fn decide(
        &self,
        situation: &str,
        chunks: Option<ChunkSender>,
    ) -> Result<DecisionReply, DecisionError>;
}

type ServiceFactory = Arc<dyn Fn(&str) -> Arc<dyn DecisionService> + Send + Sync>;

/// Resolves an agent identity to a decision service
#[derive(Clone)]
pub struct DecisionRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl Default for DecisionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionRegistry {
    /// Registry with only the built-in `random` provider
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("random", |_model| {
            Arc::new(RandomDecisionService) as Arc<dyn DecisionService>
        });
        registry
    }

    /// Registry for every configured provider
    pub fn from_config(providers: &HashMap<String, ProviderConfig>) -> Self {
        let mut registry = Self::new();
        for (name, config) in providers {
            let name_owned = name.clone();
            let kind = config.kind;
            let config = config.clone();
            match kind {
                ProviderKind::Openai => {
                    let client = reqwest::Client::new();
                    registry.register(name, move |model| {
                        Arc::new(OpenAiDecisionService::from_config(
                            &name_owned,
                            client.clone(),
                            &config,
                            model,
                        )) as Arc<dyn DecisionService>
                    });
                }
                ProviderKind::Command => {
                    registry.register(name, move |model| {
                        Arc::new(CommandDecisionService::from_config(
                            &name_owned,
                            &config,
                            model,
                        )) as Arc<dyn DecisionService>
                    });
                }
                ProviderKind::Random => {
                    registry.register(name, |_model| {
                        Arc::new(RandomDecisionService) as Arc<dyn DecisionService>
                    });
                }
            }
            tracing::debug!(provider = %name, kind = ?kind, "Registered decision provider");
        }
        registry
    }

    /// Add or replace a provider
    pub fn register<F>(&mut self, provider: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Arc<dyn DecisionService> + Send + Sync + 'static,
    {
        self.factories.insert(provider.into(), Arc::new(factory));
    }

    /// Register a single shared service instance for a provider
    pub fn register_service(&mut self, provider: impl Into<String>, service: Arc<dyn DecisionService>) {
        self.register(provider, move |_model| service.clone());
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn service_for(
        &self,
        identity: &AgentIdentity,
    ) -> Result<Arc<dyn DecisionService>, DecisionError> {
        let factory = self
            .factories
            .get(&identity.provider)
            .ok_or_else(|| DecisionError::UnknownProvider(identity.provider.clone()))?;
        Ok(factory(&identity.model))
    }
}
