//! Decision service backed by a local CLI (e.g. `claude -p`)
//!
//! The situation (prefixed with the system prompt) is passed as the final
//! argument and stdout is taken as the reply. `{model}` in the configured
//! arguments is replaced with the agent's model.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ChunkSender, DecisionError, DecisionReply, DecisionService, SYSTEM_PROMPT};
use crate::config::ProviderConfig;

const DEFAULT_PROGRAM: &str = "claude";

pub struct CommandDecisionService {
    provider: String,
    program: String,
    args: Vec<String>,
    include_system_prompt: bool,
}

impl CommandDecisionService {
    pub fn new(provider: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            provider: provider.into(),
            program: program.into(),
            args,
            include_system_prompt: true,
        }
    }

    pub fn from_config(provider: &str, config: &ProviderConfig, model: &str) -> Self {
        let args = config
            .args
            .iter()
            .map(|arg| arg.replace("{model}", model))
            .collect();
        Self::new(
            provider,
            config
                .program
                .clone()
                .unwrap_or_else(|| DEFAULT_PROGRAM.to_string()),
            args,
        )
    }

    /// Pass the situation through unchanged
    pub fn without_system_prompt(mut self) -> Self {
        self.include_system_prompt = false;
        self
    }

    fn resolve_program(&self) -> Result<PathBuf, DecisionError> {
        which::which(&self.program).map_err(|_| {
            DecisionError::Config(format!("program not found on PATH: {}", self.program))
        })
    }

    fn prompt(&self, situation: &str) -> String {
        if self.include_system_prompt {
            format!("{}\n\n{}", SYSTEM_PROMPT, situation)
        } else {
            situation.to_string()
        }
    }
}

#[async_trait]
impl DecisionService for CommandDecisionService {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn decide(
        &self,
        situation: &str,
        _chunks: Option<ChunkSender>,
    ) -> Result<DecisionReply, DecisionError> {
        let program = self.resolve_program()?;

        let mut cmd = Command::new(program);
        cmd.args(&self.args);
        cmd.arg(self.prompt(situation));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // a timed-out decision aborts this future; take the child down with it
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecisionError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(DecisionError::Parse("empty output".into()));
        }
        Ok(DecisionReply::from_text(&stdout))
    }
}
