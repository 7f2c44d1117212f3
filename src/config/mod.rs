mod settings;

pub use settings::{
    BattleConfig, Config, EngineConfig, ProviderConfig, ProviderKind, ServerConfig, EXAMPLE_CONFIG,
};
