//! CLI for msgdispatch
//!
//! Subcommands:
//! - `server`: run the websocket broker
//! - `check-rules`: validate a dispatch rule document

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use msgdispatch::broker::Broker;
use msgdispatch::config::{BacklogKind, Settings, load_config_from};
use msgdispatch::dispatch::{EngineSettings, StatusConfigurationTable, parser};
use msgdispatch::persistence::BacklogStorage;
use msgdispatch::transport::websocket::start_websocket_server;
use msgdispatch::utils::logging;

#[derive(Parser)]
#[command(name = "msgdispatch", version)]
enum Command {
    /// Start the websocket broker
    Server {
        /// Configuration file layered over config/default and under the environment
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Parse a dispatch rule document and list its status blocks
    CheckRules {
        /// Path to a <msgDispatch> document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let result = match Command::parse() {
        Command::Server { config } => run_server(config.as_deref()).await,
        Command::CheckRules { file } => {
            logging::init("info");
            check_rules(&file)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::init("error");
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_rules(path: &Path) -> Result<StatusConfigurationTable, Box<dyn Error>> {
    let document = fs::read_to_string(path)
        .map_err(|e| format!("cannot read rule file {}: {e}", path.display()))?;
    let table = parser::parse(&document)
        .map_err(|e| format!("invalid rule file {}: {e}", path.display()))?;
    Ok(table)
}

fn check_rules(path: &Path) -> Result<(), Box<dyn Error>> {
    let table = load_rules(path)?;
    info!(
        "{} is valid: default status {}, default action {}",
        path.display(),
        table.default_status().unwrap_or("none"),
        table.default_action()
    );
    for block in table.blocks() {
        info!(
            "  oid={} content={} connectionState={} default={}",
            block.oid().unwrap_or("-"),
            block.content().unwrap_or("-"),
            block.connection_state().map_or("-", |s| s.as_str()),
            block.default_action()
        );
    }
    Ok(())
}

async fn run_server(config: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let settings: Settings = load_config_from(config)?;
    logging::init(&settings.logging.level);

    let table = match &settings.dispatch.rules_file {
        Some(path) => load_rules(Path::new(path))?,
        None => StatusConfigurationTable::default(),
    };
    let storage = match settings.dispatch.backlog {
        BacklogKind::Memory => BacklogStorage::Memory,
        BacklogKind::Sled => BacklogStorage::open_sled(&settings.dispatch.backlog_path)?,
    };
    let engine_settings = EngineSettings {
        config_key: settings.dispatch.config_key.clone(),
        admin_identity: settings.dispatch.admin_identity.clone(),
    };
    let broker = Arc::new(Broker::new(table, storage, engine_settings));
    info!(
        "Dispatch rules are administered on topic {}",
        broker.admin_topic()
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    tokio::select! {
        res = start_websocket_server(addr, broker, settings.clone()) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}
