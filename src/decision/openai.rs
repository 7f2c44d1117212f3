//! OpenAI-compatible chat completion service
//!
//! Works against any endpoint that speaks `/chat/completions` (OpenAI,
//! OpenRouter, local llama.cpp / vLLM servers). With a chunk sender the
//! request is streamed over SSE and every content delta is forwarded.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::{json, Value};

use super::{ChunkSender, DecisionError, DecisionReply, DecisionService, SYSTEM_PROMPT};
use crate::config::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 400;

pub struct OpenAiDecisionService {
    provider: String,
    client: Client,
    base_url: String,
    api_key_env: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiDecisionService {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            client: Client::new(),
            base_url: base_url.into(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn from_config(provider: &str, client: Client, config: &ProviderConfig, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_env: config
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            model: model.to_string(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, situation: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": stream,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": situation },
            ],
        })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint()).json(body);
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn decide_blocking(&self, situation: &str) -> Result<DecisionReply, DecisionError> {
        let response = self.request(&self.request_body(situation, false)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let value: Value = response.json().await?;
        let content = completion_content(&value)
            .ok_or_else(|| DecisionError::Parse("No message content in completion".into()))?;
        Ok(DecisionReply::from_text(content))
    }

    async fn decide_streaming(
        &self,
        situation: &str,
        chunks: ChunkSender,
    ) -> Result<DecisionReply, DecisionError> {
        let mut events = self
            .request(&self.request_body(situation, true))
            .eventsource()
            .map_err(|err| DecisionError::Request(err.to_string()))?;

        let mut text = String::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<Value>(&msg.data) {
                        Ok(value) => {
                            if let Some(delta) = stream_delta(&value) {
                                text.push_str(delta);
                                if chunks.send(delta.to_string()).await.is_err() {
                                    tracing::debug!(provider = %self.provider, "Reasoning receiver dropped");
                                }
                            }
                        }
                        Err(error) => {
                            tracing::debug!(provider = %self.provider, error = %error, "Skipping malformed stream event");
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    events.close();
                    let body = response.text().await.unwrap_or_default();
                    return Err(DecisionError::Http {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    events.close();
                    return Err(DecisionError::Request(err.to_string()));
                }
            }
        }
        events.close();

        if text.trim().is_empty() {
            return Err(DecisionError::Parse("Empty streamed completion".into()));
        }
        Ok(DecisionReply::from_text(&text))
    }
}

#[async_trait]
impl DecisionService for OpenAiDecisionService {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn decide(
        &self,
        situation: &str,
        chunks: Option<ChunkSender>,
    ) -> Result<DecisionReply, DecisionError> {
        match chunks {
            Some(chunks) => self.decide_streaming(situation, chunks).await,
            None => self.decide_blocking(situation).await,
        }
    }
}

/// `choices[0].message.content` of a completion
fn completion_content(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// `choices[0].delta.content` of a streamed chunk
fn stream_delta(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
}
