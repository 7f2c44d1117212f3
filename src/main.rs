use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use colosseum::battle::{BattleGate, Broadcaster, OutcomeSink, PlainSituationFormatter};
use colosseum::data::{BattleRecordStore, Database};
use colosseum::decision::DecisionRegistry;
use colosseum::engine::{BattleEngine, ShowdownEngine};
use colosseum::web::{run_server, WebAppState};
use colosseum::{util, Config};

#[derive(Parser)]
#[command(name = "colosseum")]
#[command(about = "Spectated battles between two language-model agents")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.colosseum)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the battle server
    Serve {
        /// Address to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List recently finished battles
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (<data_dir>/logs/colosseum.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("colosseum=info")),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config = config.with_host(host);
            }
            if let Some(port) = port {
                config = config.with_port(port);
            }
            serve(config).await
        }
        Commands::History { limit } => history(limit),
    }
}

async fn serve(config: Config) -> Result<()> {
    let engine: Arc<dyn BattleEngine> = match &config.engine.showdown_path {
        Some(path) => Arc::new(ShowdownEngine::with_path(path.clone())),
        None => Arc::new(ShowdownEngine::new()),
    };
    if !engine.is_available() {
        tracing::warn!("pokemon-showdown not found; battles will fail to start");
        eprintln!("warning: pokemon-showdown not found, battles will fail to start");
    }

    let registry = DecisionRegistry::from_config(&config.providers);
    tracing::info!(providers = ?registry.providers(), "Decision providers registered");

    let database = Database::open_default().context("Failed to open database")?;
    let store = BattleRecordStore::new(database.connection());

    let gate = BattleGate::new(
        engine,
        registry,
        Broadcaster::new(config.battle.event_buffer),
        config.battle.gate_config(),
    )
    .with_sink(Arc::new(store.clone()) as Arc<dyn OutcomeSink>)
    .with_formatter(Arc::new(PlainSituationFormatter::new(
        config.battle.log_tail_lines,
    )));

    let state = WebAppState::new(gate).with_records(store);
    println!(
        "Colosseum listening on http://{}:{}",
        config.server.host, config.server.port
    );
    run_server(state, &config.server).await
}

fn history(limit: usize) -> Result<()> {
    let database = Database::open_default().context("Failed to open database")?;
    let store = BattleRecordStore::new(database.connection());
    let records = store.recent(limit)?;

    if records.is_empty() {
        println!("No battles recorded yet");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {}  {}  {}",
            record.ended_at.format("%Y-%m-%d %H:%M"),
            record.id,
            record.format,
            record.summary()
        );
    }
    Ok(())
}
