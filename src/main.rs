// ABOUTME: CLI entry point for dbsync-replicator
// ABOUTME: Parses commands, loads configuration and routes to handlers

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dbsync_replicator::commands;
use dbsync_replicator::config::{SyncConfig, DEFAULT_CONFIG_PATH};
use sync_queue::SyncOperation;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbsync-replicator")]
#[command(about = "Row-level change detection and delivery between database sites", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the dbsync.toml configuration file
    #[arg(long, global = true, env = "DBSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "DBSYNC_LOG", default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PublishOperation {
    Insert,
    Update,
}

impl From<PublishOperation> for SyncOperation {
    fn from(op: PublishOperation) -> Self {
        match op {
            PublishOperation::Insert => SyncOperation::Insert,
            PublishOperation::Update => SyncOperation::Update,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the content hash of an entity snapshot
    Hash {
        /// Registered entity type of the snapshot
        #[arg(long)]
        entity: String,
        /// JSON snapshot file (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Print the canonical payload instead of its hash
        #[arg(long)]
        canonical: bool,
    },
    /// Hash a snapshot and queue a sync event if the entity changed
    Publish {
        #[arg(long)]
        entity: String,
        /// Global identifier of the entity
        #[arg(long = "id")]
        identifier: String,
        #[arg(long, value_enum, default_value_t = PublishOperation::Update)]
        operation: PublishOperation,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Queue a delete event for an entity
    Delete {
        #[arg(long)]
        entity: String,
        #[arg(long = "id")]
        identifier: String,
    },
    /// List pending sync events without consuming them
    Browse {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Consume sync events into the local replica until interrupted
    Consume,
    /// Print the content hash of a file's bytes
    HashFile { path: PathBuf },
}

fn init_tracing(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter).or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to init tracing subscriber: {err}"))
}

fn load_config(path: &Path) -> Result<SyncConfig> {
    SyncConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log)?;

    match cli.command {
        Commands::Hash {
            entity,
            file,
            canonical,
        } => {
            let config = load_config(&cli.config)?;
            commands::hash(&config, &entity, file.as_deref(), canonical)
        }
        Commands::Publish {
            entity,
            identifier,
            operation,
            file,
        } => {
            let config = load_config(&cli.config)?;
            commands::publish(
                &config,
                &entity,
                &identifier,
                operation.into(),
                file.as_deref(),
            )
        }
        Commands::Delete { entity, identifier } => {
            let config = load_config(&cli.config)?;
            commands::delete(&config, &entity, &identifier)
        }
        Commands::Browse { limit } => {
            let config = load_config(&cli.config)?;
            commands::browse(&config, limit)
        }
        Commands::Consume => {
            let config = load_config(&cli.config)?;
            commands::consume(&config)
        }
        Commands::HashFile { path } => commands::hash_file(&path),
    }
}
