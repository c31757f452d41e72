//! Syncto CLI - Command line interface for syncing an account.
//!
//! Pulls the requested collections through the sync engine and prints
//! what the server holds. The CLI never writes records back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use syncto_crypto::{client_state, MasterKey};
use syncto_storage::{Collection, Conflict, Record};
use syncto_sync::{
    EngineConfig, EngineOptions, ErrorKind, SyncAdapter, SyncEngine, SyncError, SyncOptions,
};

#[derive(Parser)]
#[command(name = "syncto")]
#[command(about = "Syncto - Encrypted record sync client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the client-state id derived from a master key.
    ClientState {
        /// Hex-encoded master key (kB).
        #[arg(short, long)]
        kb: String,
    },

    /// Sync collections and list their records.
    Sync {
        /// Configuration file (default: <config dir>/syncto/config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Collection to sync; repeat for several (default: all configured).
        #[arg(short = 'n', long = "collection")]
        collections: Vec<String>,
    },

    /// Drop local per-account state for collections.
    Reset {
        /// Configuration file (default: <config dir>/syncto/config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Collection to reset; repeat for several (default: all configured).
        #[arg(short = 'n', long = "collection")]
        collections: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::ClientState { kb } => cmd_client_state(&kb),

        Commands::Sync {
            config,
            collections,
        } => cmd_sync(config, &collections).await,

        Commands::Reset {
            config,
            collections,
        } => cmd_reset(config, &collections).await,
    }
}

/// Adapter that prints every record and never writes locally.
struct PrintAdapter {
    collection: String,
}

#[async_trait]
impl SyncAdapter for PrintAdapter {
    async fn update(
        &self,
        collection: Arc<Collection>,
        _options: &SyncOptions,
    ) -> syncto_common::Result<bool> {
        let records = collection.list().await;

        println!("{} ({} records):", self.collection, records.len());
        for record in &records {
            println!("  {} {}", record.id, record.payload);
        }
        Ok(false)
    }

    async fn handle_conflict(&self, conflict: &Conflict) -> syncto_common::Result<Record> {
        debug!(collection = %self.collection, id = conflict.id(), "Keeping remote version");
        Ok(conflict.remote.clone())
    }

    async fn reset(&self, options: &SyncOptions) -> syncto_common::Result<()> {
        info!(
            collection = %self.collection,
            userid = options.userid().unwrap_or_default(),
            "Nothing stored locally to reset"
        );
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(dir.join("syncto").join("config.json"))
}

async fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    info!("Loading configuration from {}", path.display());

    EngineConfig::from_file(&path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Pick the requested collections, falling back to every configured one.
fn select(config: &EngineConfig, requested: &[String]) -> HashMap<String, SyncOptions> {
    if requested.is_empty() {
        return config.sync_options();
    }
    requested
        .iter()
        .map(|name| {
            let options = config.collections.get(name).cloned().unwrap_or_default();
            (name.clone(), options)
        })
        .collect()
}

fn build_engine(
    config: &EngineConfig,
    collections: &HashMap<String, SyncOptions>,
) -> Result<SyncEngine> {
    let options = collections.keys().fold(EngineOptions::from_config(config), |options, name| {
        options.with_adapter(
            name.as_str(),
            PrintAdapter {
                collection: name.clone(),
            },
        )
    });

    SyncEngine::new(options).map_err(describe)
}

/// Turn an engine failure into a message telling the user what to do.
fn describe(err: SyncError) -> anyhow::Error {
    let hint = match err.kind() {
        ErrorKind::Auth => "the assertion was rejected; sign in again and update the config",
        ErrorKind::TryLater => "the server is unavailable; try again later",
        ErrorKind::InvalidAccount => "the account has no sync data; set it up from a browser first",
        ErrorKind::Unrecoverable => "check the configuration and the account keys",
    };
    anyhow::anyhow!("{} ({})", err, hint)
}

/// Print the client-state id for a master key.
fn cmd_client_state(kb: &str) -> Result<()> {
    let master_key = MasterKey::from_hex(kb).context("Invalid master key")?;
    let id = client_state(&master_key).context("Failed to derive client state")?;

    println!("{}", id);
    Ok(())
}

/// Sync collections and print their contents.
async fn cmd_sync(config: Option<PathBuf>, requested: &[String]) -> Result<()> {
    let config = load_config(config).await?;
    let collections = select(&config, requested);
    if collections.is_empty() {
        anyhow::bail!("No collections to sync. Add some to the config or pass --collection");
    }

    let engine = build_engine(&config, &collections)?;
    info!("Syncing {} collection(s)", collections.len());

    engine.sync_now(collections).await.map_err(describe)?;

    println!("Sync complete.");
    Ok(())
}

/// Reset collections without contacting the server.
async fn cmd_reset(config: Option<PathBuf>, requested: &[String]) -> Result<()> {
    let config = load_config(config).await?;
    let collections = select(&config, requested);

    let engine = build_engine(&config, &collections)?;
    engine.reset(collections).await.map_err(describe)?;

    println!("Reset complete.");
    Ok(())
}
