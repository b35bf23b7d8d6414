//! CLI argument definitions for the Brain replay binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Brain: replay conversational turns through the action orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "brain", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// JSON catalog of actions, schemas and brands.
    #[arg(long = "catalog")]
    pub catalog: PathBuf,

    /// JSON array of user profiles. Unknown users are treated as guests.
    #[arg(short = 'u', long = "users")]
    pub users: Option<PathBuf>,

    /// JSON array of turn payloads, replayed in order.
    #[arg(short = 't', long = "turns")]
    pub turns: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Run ready actions after each turn.
    #[arg(long = "execute")]
    pub execute: bool,

    /// Print each touched session's final state after the replay.
    #[arg(long = "dump-state")]
    pub dump_state: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BRAIN_CONFIG env var > ./brain.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BRAIN_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("brain.toml")
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}
