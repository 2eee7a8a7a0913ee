//! Stash CLI
//!
//! Command-line client that keeps a local copy of account data in sync with
//! the remote service.
//!
//! # Commands
//!
//! - `list` / `get` - Read local records, refreshing them when stale
//! - `put` / `delete` - Change a record locally and submit it
//! - `sync` / `flush` - Pull the change feed, submit pending changes
//! - `resolve` - Keep or discard a conflicting local change
//! - `pending` / `status` / `usage` - Inspect local state
//! - `verify` / `compact` - Store maintenance

mod config;
mod controller;
mod format;

use clap::{Parser, Subcommand};
use config::{FileConfig, FlagOverrides, Settings};
use controller::{
    Controller, ControllerError, ControllerOptions, ControllerResult, ListOptions, Output,
    Resolution,
};
use format::OutputFormat;
use stash_protocol::EntityId;
use stash_remote::{HttpRemote, ReqwestClient, RemoteParams, RetryPolicy};
use stash_store::FileStore;
use stash_sync::{SyncConfig, SyncEngine, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Keeps a local copy of your account data in sync.
#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Remote service URL
    #[arg(global = true, long)]
    host: Option<String>,

    /// Enable debug logging, including remote requests
    #[arg(global = true, short, long)]
    debug: bool,

    /// Configuration file (TOML)
    #[arg(global = true, short, long, env = "STASH_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Serve reads from the local store without refreshing
    #[arg(global = true, long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information
    Version,

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that work on the local store.
#[derive(Subcommand)]
enum StoreCommand {
    /// List records
    List {
        /// Include deleted records
        #[arg(short, long)]
        all: bool,

        /// Only records with a pending local change
        #[arg(long)]
        dirty: bool,

        /// Start after this entity ID
        #[arg(long)]
        after: Option<EntityId>,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one record
    Get {
        /// Entity ID
        id: EntityId,
    },

    /// Create or replace a record
    Put {
        /// Entity ID
        id: EntityId,

        /// Payload given inline
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        value: Option<String>,

        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Delete a record
    Delete {
        /// Entity ID
        id: EntityId,
    },

    /// Pull remote changes and submit pending ones
    Sync,

    /// Submit pending changes without pulling
    Flush,

    /// Settle a pending change that conflicts with the remote
    Resolve {
        /// Entity ID
        id: EntityId,

        /// Reapply the local change on top of the remote version
        #[arg(long, conflicts_with = "discard", required_unless_present = "discard")]
        keep_local: bool,

        /// Drop the local change and take the remote version
        #[arg(long)]
        discard: bool,
    },

    /// List pending local changes
    Pending,

    /// Show store and sync state
    Status,

    /// Show storage used
    Usage,

    /// Check store consistency
    Verify,

    /// Rewrite the store log to reclaim space
    Compact,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli) {
        Ok(output) => {
            if !output.body.is_empty() {
                println!("{}", output.body);
            }
            ExitCode::from(output.status.code())
        }
        Err(err) => {
            tracing::debug!(?err, "command failed");
            eprintln!("error: {err}");
            if let Some(hint) = err.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(err.status().code())
        }
    }
}

fn dispatch(cli: Cli) -> ControllerResult<Output> {
    let Cli {
        store,
        host,
        debug,
        config,
        format,
        offline,
        command,
    } = cli;

    let command = match command {
        Commands::Version => {
            return Ok(Output::ok(format!(
                "Stash CLI v{}\nStash Sync v{}",
                env!("CARGO_PKG_VERSION"),
                stash_sync::VERSION
            )))
        }
        Commands::Store(command) => command,
    };

    let file = FileConfig::load(config.as_deref())?;
    let settings = Settings::resolve(FlagOverrides { host, store }, file)?;
    tracing::debug!(?settings, "settings resolved");

    let store = FileStore::open(&settings.store).map_err(SyncError::from)?;
    let http = ReqwestClient::new(settings.timeout)
        .map_err(|e| ControllerError::Config(format!("cannot create HTTP client: {e}")))?;
    let remote = HttpRemote::new(
        RemoteParams::new(settings.host.clone()).with_debug(debug),
        http,
    );
    let config = SyncConfig::new()
        .with_page_size(settings.page_size)
        .with_retry(RetryPolicy::new(settings.retry_attempts));
    let controller = Controller::new(
        SyncEngine::new(config, store, remote),
        ControllerOptions {
            max_age: settings.max_age,
            quota_bytes: settings.quota_bytes,
            format,
            offline,
        },
    );

    controller.init()?;
    let result = execute(&controller, command);
    let closed = controller.close();
    let output = result?;
    closed?;
    Ok(output)
}

fn execute<S, R>(controller: &Controller<S, R>, command: StoreCommand) -> ControllerResult<Output>
where
    S: stash_store::LocalStore,
    R: stash_remote::RemoteClient,
{
    match command {
        StoreCommand::List {
            all,
            dirty,
            after,
            limit,
        } => controller.list(ListOptions {
            all,
            dirty,
            after,
            limit,
        }),
        StoreCommand::Get { id } => controller.get(id),
        StoreCommand::Put { id, value, file } => {
            let payload = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(path)) => std::fs::read(&path).map_err(|e| {
                    ControllerError::Input(format!("cannot read {}: {e}", path.display()))
                })?,
                (None, None) => {
                    return Err(ControllerError::Input(
                        "either --value or --file is required".to_string(),
                    ))
                }
            };
            controller.put(id, payload)
        }
        StoreCommand::Delete { id } => controller.delete(id),
        StoreCommand::Sync => controller.sync(),
        StoreCommand::Flush => controller.flush(),
        StoreCommand::Resolve {
            id,
            keep_local,
            discard,
        } => {
            let resolution = match (keep_local, discard) {
                (true, false) => Resolution::KeepLocal,
                (false, true) => Resolution::Discard,
                _ => {
                    return Err(ControllerError::Input(
                        "pass exactly one of --keep-local or --discard".to_string(),
                    ))
                }
            };
            controller.resolve(id, resolution)
        }
        StoreCommand::Pending => controller.pending(),
        StoreCommand::Status => controller.status(),
        StoreCommand::Usage => controller.usage(),
        StoreCommand::Verify => controller.verify(),
        StoreCommand::Compact => controller.compact(),
    }
}
