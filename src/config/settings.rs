use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::battle::{GateConfig, DEFAULT_EVENT_BUFFER, DEFAULT_FORMAT, DEFAULT_LOG_TAIL_LINES};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub battle: BattleConfig,
    pub engine: EngineConfig,
    /// Decision providers by name
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow any origin (the observer UI is usually served elsewhere)
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_permissive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleConfig {
    pub default_format: String,
    pub decision_timeout_ms: u64,
    /// Events buffered per observer before it lags
    pub event_buffer: usize,
    /// Protocol lines included in each situation prompt
    pub log_tail_lines: usize,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            default_format: DEFAULT_FORMAT.to_string(),
            decision_timeout_ms: 30_000,
            event_buffer: DEFAULT_EVENT_BUFFER,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

impl BattleConfig {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            default_format: self.default_format.clone(),
            decision_timeout: Duration::from_millis(self.decision_timeout_ms),
            ..GateConfig::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Path to `pokemon-showdown`; resolved from PATH when unset
    pub showdown_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions endpoint
    Openai,
    /// Local CLI taking the prompt as its last argument
    Command,
    /// Never answers
    #[default]
    Random,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_permissive: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlBattleConfig {
    pub default_format: Option<String>,
    pub decision_timeout_ms: Option<u64>,
    pub event_buffer: Option<usize>,
    pub log_tail_lines: Option<usize>,
}

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub server: Option<TomlServerConfig>,
    pub battle: Option<TomlBattleConfig>,
    pub engine: Option<EngineConfig>,
    pub providers: Option<HashMap<String, ProviderConfig>>,
}

impl Config {
    /// Load configuration from the default config file, merged over defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        Self::load_from(&config_file)
    }

    /// Load from a specific file; a missing or invalid file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No config file, using defaults");
                return Config::default();
            }
        };
        match Self::from_toml_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Config::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();

        if let Some(server) = toml_config.server {
            if let Some(host) = server.host {
                config.server.host = host;
            }
            if let Some(port) = server.port {
                config.server.port = port;
            }
            if let Some(cors) = server.cors_permissive {
                config.server.cors_permissive = cors;
            }
        }

        if let Some(battle) = toml_config.battle {
            if let Some(format) = battle.default_format {
                config.battle.default_format = format;
            }
            if let Some(timeout) = battle.decision_timeout_ms {
                config.battle.decision_timeout_ms = timeout;
            }
            if let Some(buffer) = battle.event_buffer {
                config.battle.event_buffer = buffer.max(1);
            }
            if let Some(lines) = battle.log_tail_lines {
                config.battle.log_tail_lines = lines;
            }
        }

        if let Some(engine) = toml_config.engine {
            config.engine = engine;
        }

        if let Some(providers) = toml_config.providers {
            config.providers = providers;
        }

        Ok(config)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &PathBuf) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.server.host = host.into();
        self
    }
}
