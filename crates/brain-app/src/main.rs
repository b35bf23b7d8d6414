//! Brain application binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Load the action catalog and user profiles
//! 3. Wire in-memory stores and the HTTP schema client into the orchestrator
//! 4. Replay turn payloads, printing each response as a JSON line

mod cli;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use brain_action::{
    BrainOrchestrator, EngineDeps, HandlerRegistry, HttpSchemaDataClient, InMemoryCatalog,
    InMemoryIntentLedger, InMemorySessionStore, InMemoryUsers, TurnPayload,
};
use brain_core::config::BrainConfig;

use cli::CliArgs;

fn load_turns(path: &Path) -> Result<Vec<TurnPayload>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = BrainConfig::load_or_default(&config_file);

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Brain v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Collaborators.
    let catalog = Arc::new(InMemoryCatalog::load(&args.catalog)?);
    let users = match &args.users {
        Some(path) => InMemoryUsers::load(path)?,
        None => InMemoryUsers::new(Vec::new()),
    };
    let deps = EngineDeps {
        catalog: catalog.clone(),
        users: Arc::new(users),
        ledger: Arc::new(InMemoryIntentLedger::new()),
        sessions: Arc::new(InMemorySessionStore::new()),
        schema_registry: catalog,
        schema_client: Arc::new(HttpSchemaDataClient::new()),
    };

    let mut orchestrator = BrainOrchestrator::new(deps, &config);
    if args.execute {
        let mut registry = HandlerRegistry::new();
        registry.register_defaults();
        orchestrator = orchestrator.with_executor(registry);
        tracing::info!("Executor attached");
    }

    // Replay.
    let turns = load_turns(&args.turns)?;
    tracing::info!(turns = turns.len(), path = %args.turns.display(), "Replaying turns");

    let mut sessions = BTreeSet::new();
    for payload in turns {
        sessions.insert(payload.session_id.clone());
        let response = orchestrator.process_turn(payload).await?;
        println!("{}", serde_json::to_string(&response)?);
    }

    if args.dump_state {
        for session_id in sessions {
            let state = orchestrator.queue().snapshot(&session_id).await?;
            println!(
                "{}",
                serde_json::json!({ "sessionId": session_id, "state": state })
            );
        }
    }

    tracing::info!("Replay finished");
    Ok(())
}
