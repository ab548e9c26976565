//! MySQL gateway sync tool
//!
//! Copies MySQL databases from remote environments, reached through an SSH
//! gateway, into local ones. Environments come from a Rails-style
//! `database.yml`: entries with `server` and `server_username` are sources,
//! everything else is a destination.
//!
//! ```bash
//! dbsync environments
//! dbsync copy production development
//! dbsync copy-table production development orders
//! dbsync incremental production development
//! dbsync sync production development --since 2024-01-01 --small-table-threshold 1000
//! dbsync run copy_from_production_to_development
//! ```

// dbsync/src/main.rs
mod command;
mod config;
mod errors;
mod inspect;
mod plan;
mod sync;
mod tunnel;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppSettings, ConfigRegistry, settings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use sync::{ShortcutTable, SyncContext};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dbsync")]
#[command(about = "Copy MySQL databases from gateway-protected environments into local ones")]
struct Cli {
    /// Environment registry (database.yml)
    #[arg(long, env = "DBSYNC_CONFIG", default_value = settings::DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Local port for the SSH forward
    #[arg(long, env = "DBSYNC_LOCAL_PORT", default_value_t = settings::DEFAULT_LOCAL_PORT, global = true)]
    local_port: u16,

    /// Database port on the remote side of the gateway, for sources without `port`
    #[arg(long, env = "DBSYNC_REMOTE_PORT", default_value_t = settings::DEFAULT_REMOTE_PORT, global = true)]
    remote_port: u16,

    /// Seconds to wait for the tunnel to come up
    #[arg(long, env = "DBSYNC_TUNNEL_TIMEOUT", default_value_t = 20, global = true)]
    tunnel_timeout: u64,

    /// Seconds a dump/restore pipeline may run
    #[arg(long, env = "DBSYNC_COMMAND_TIMEOUT", default_value_t = 6 * 60 * 60, global = true)]
    command_timeout: u64,

    /// Creation timestamp column used by `sync`
    #[arg(long, env = "DBSYNC_TIMESTAMP_COLUMN", default_value = settings::DEFAULT_TIMESTAMP_COLUMN, global = true)]
    timestamp_column: String,

    /// Table left out of id comparisons
    #[arg(long, env = "DBSYNC_EXCLUDED_TABLE", default_value = settings::DEFAULT_EXCLUDED_TABLE, global = true)]
    excluded_table: String,

    /// Print the commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sources and destinations
    Environments,
    /// Print the tables of a source as JSON
    Inspect { source: String },
    /// Copy a whole database
    Copy { source: String, destination: String },
    /// Copy a single table
    CopyTable {
        source: String,
        destination: String,
        table: String,
    },
    /// Copy rows whose primary key is beyond the destination's
    Incremental { source: String, destination: String },
    /// Copy large tables since a cutoff and small ones whole
    Sync {
        source: String,
        destination: String,
        /// Cutoff time (RFC 3339, "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD")
        #[arg(long)]
        since: String,
        #[arg(long, default_value_t = settings::DEFAULT_SMALL_TABLE_THRESHOLD)]
        small_table_threshold: i64,
    },
    /// List the copy_from_<source>_to_<destination> shortcuts
    Shortcuts,
    /// Copy using a shortcut name
    Run { shortcut: String },
}

impl Cli {
    fn settings(&self) -> AppSettings {
        AppSettings {
            config_path: self.config.clone(),
            local_port: self.local_port,
            remote_port: self.remote_port,
            tunnel_timeout: Duration::from_secs(self.tunnel_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            timestamp_column: self.timestamp_column.clone(),
            excluded_table: self.excluded_table.clone(),
            dry_run: self.dry_run,
        }
    }
}

/// Main entry point for the sync tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    let registry = ConfigRegistry::load(&settings.config_path).with_context(|| {
        format!(
            "Failed to load environments from {}",
            settings.config_path.display()
        )
    })?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping...");
            on_interrupt.cancel();
        }
    });

    let shortcuts = ShortcutTable::build(&registry);
    let ctx = SyncContext::new(registry, settings, cancel);

    match cli.command {
        Commands::Environments => {
            println!("Sources:");
            for name in ctx.registry.list_sources() {
                println!("  {}", name);
            }
            println!("Destinations:");
            for name in ctx.registry.list_destinations() {
                println!("  {}", name);
            }
        }
        Commands::Inspect { source } => {
            let tables = inspect::inspect(&ctx, &source)
                .await
                .with_context(|| format!("Failed to inspect {}", source))?;
            let tables: Vec<_> = tables.into_values().collect();
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
        Commands::Copy {
            source,
            destination,
        } => sync::copy(&ctx, &source, &destination).await?,
        Commands::CopyTable {
            source,
            destination,
            table,
        } => sync::copy_table(&ctx, &source, &destination, &table).await?,
        Commands::Incremental {
            source,
            destination,
        } => sync::incremental_copy(&ctx, &source, &destination).await?,
        Commands::Sync {
            source,
            destination,
            since,
            small_table_threshold,
        } => {
            let cutoff = sync::parse_cutoff(&since)?;
            sync::sync(&ctx, &source, &destination, cutoff, small_table_threshold).await?
        }
        Commands::Shortcuts => {
            if shortcuts.is_empty() {
                println!("No source/destination pairs defined in {}", ctx.registry.path().display());
            }
            for (name, source, destination) in shortcuts.iter() {
                println!("{:<40} {} -> {}", name, source, destination);
            }
            tracing::debug!("{} shortcuts registered", shortcuts.len());
        }
        Commands::Run { shortcut } => {
            let (source, destination) = shortcuts.resolve(&shortcut)?;
            sync::copy(&ctx, source, destination).await?
        }
    }
    Ok(())
}
