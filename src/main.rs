//! # Capture OS CLI (`capos`)
//!
//! ## Usage
//!
//! ```bash
//! capos --config ./config/capos.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `capos init` | Create the SQLite database and run schema migrations |
//! | `capos serve` | Start the HTTP server |
//! | `capos keygen` | Issue a batch of unused license keys |
//! | `capos add <key>` | Insert a single license key |
//! | `capos admin grant\|revoke <key>` | Toggle the admin flag |
//! | `capos admin first [n]` | Make the `n` oldest keys admins |
//! | `capos import <users.json>` | Import a legacy key map |
//! | `capos stats` | Print license counts |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use capture_os::{admin, config, keygen, migrate, server, stats};

/// Capture OS: turn links and notes into structured Notion pages.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/capos.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "capos",
    about = "Capture OS: license-gated capture into Notion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/capos.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Generate a batch of unused license keys and export them to a text file.
    Keygen {
        /// Number of keys to generate.
        #[arg(long, default_value_t = 50)]
        count: usize,

        /// Sales channel code, used as the batch prefix (e.g. TB, XY, MD).
        #[arg(long, default_value = "TB")]
        channel: String,
    },

    /// Insert a single license key.
    Add {
        key: String,

        #[arg(long, default_value = "")]
        owner: String,

        /// Expiry date (YYYY-MM-DD). Omit for a key that never expires.
        #[arg(long)]
        expires: Option<String>,
    },

    /// Manage admin keys (exempt from rate limits and expiry).
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Import a legacy `users.json` key map (insert or replace).
    Import { path: PathBuf },

    /// Show license counts and per-batch activation.
    Stats,
}

#[derive(Subcommand)]
enum AdminAction {
    Grant { key: String },
    Revoke { key: String },
    /// Grant admin to the oldest keys.
    First {
        #[arg(default_value_t = 5)]
        n: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capture_os=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Keygen { count, channel } => {
            keygen::run_keygen(&cfg, count, &channel).await?;
        }
        Commands::Add {
            key,
            owner,
            expires,
        } => {
            admin::run_add(&cfg, &key, &owner, expires.as_deref()).await?;
        }
        Commands::Admin { action } => match action {
            AdminAction::Grant { key } => admin::run_admin_set(&cfg, &key, true).await?,
            AdminAction::Revoke { key } => admin::run_admin_set(&cfg, &key, false).await?,
            AdminAction::First { n } => admin::run_admin_first(&cfg, n).await?,
        },
        Commands::Import { path } => {
            admin::run_import(&cfg, &path).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
