//! # ReachClaw Server
//!
//! Runs the outreach engine and the dashboard REST gateway in one process.
//!
//! Usage:
//!   reachclaw                          # Start with ~/.reachclaw/config.toml
//!   reachclaw --port 8080              # Override the gateway port
//!   reachclaw --no-engine              # Gateway only, queue stays untouched

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use reachclaw_content::OpenAiContentProvider;
use reachclaw_core::ReachClawConfig;
use reachclaw_engine::Coordinator;
use reachclaw_gateway::AppState;
use reachclaw_platform::HttpPlatformClient;
use reachclaw_store::EngineDb;

#[derive(Parser)]
#[command(
    name = "reachclaw",
    version,
    about = "🦀 ReachClaw, the outreach automation engine"
)]
struct Cli {
    /// Config file path (default: ~/.reachclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Gateway host override
    #[arg(long)]
    host: Option<String>,

    /// Database path
    #[arg(long, default_value = "~/.reachclaw/reachclaw.db")]
    db_path: String,

    /// Serve the API without running the engine loop
    #[arg(long)]
    no_engine: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "reachclaw=debug,reachclaw_engine=debug,reachclaw_store=debug,reachclaw_gateway=debug,tower_http=debug"
    } else {
        "reachclaw=info,reachclaw_engine=info,reachclaw_store=info,reachclaw_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config, then apply CLI overrides
    let (mut config, config_path) = match &cli.config {
        Some(p) => {
            let path = std::path::PathBuf::from(expand_path(p));
            (ReachClawConfig::load_from(&path)?, path)
        }
        None => (ReachClawConfig::load()?, ReachClawConfig::default_path()),
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(host) = &cli.host {
        config.gateway.host = host.clone();
    }

    let db_path = expand_path(&cli.db_path);
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(EngineDb::open(Path::new(&db_path))?);
    tracing::info!("💾 Database ready at {db_path}");

    // First run: seed the stored settings from the config file so the
    // dashboard and the engine agree on the initial policy.
    if db.get_settings()?.is_none() {
        db.put_settings(&serde_json::json!({ "rate_limiting": config.rate_limiting }))?;
    }

    // Rebuild today's counters from completed actions after a restart
    db.recover_counters(chrono::Utc::now())?;

    let content = if config.content.api_key.is_empty() {
        tracing::warn!("✍️ No content API key configured, generation routes disabled");
        None
    } else {
        Some(Arc::new(OpenAiContentProvider::new(config.content.clone())?)
            as Arc<dyn reachclaw_core::traits::ContentProvider>)
    };

    if cli.no_engine {
        tracing::warn!("⏸️ Engine loop disabled, queued work will not execute");
    } else {
        let platform = Arc::new(HttpPlatformClient::new(&config.platform)?);
        let coordinator = Arc::new(Coordinator::new(
            db.clone(),
            platform,
            config.engine.clone(),
        )?);
        coordinator.spawn();
    }

    let state = AppState {
        config: Arc::new(Mutex::new(config)),
        config_path,
        db,
        content,
        start_time: std::time::Instant::now(),
    };
    reachclaw_gateway::start_server(state).await?;
    Ok(())
}
