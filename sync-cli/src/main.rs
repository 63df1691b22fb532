//! # sync-cli
//!
//! CLI tool for pairing BrainPlus devices and syncing their browsing history
//! through a relay.
//!
//! ## Commands
//!
//! - `init`: Initialize device identity
//! - `add` / `list`: Manage the local digest file
//! - `pair`: Start a session, or answer one from a payload
//! - `inspect`: Decode a pairing payload
//! - `status`: Show device and sync settings
//!
//! ## Example
//!
//! ```bash
//! # Initialize device
//! sync-cli init --name "Laptop"
//!
//! # Record some history
//! sync-cli add https://example.com/article --relevance 0.8
//!
//! # Start a session and print the payload
//! sync-cli pair --create --relay ws://relay.local:8080/ws
//!
//! # On another device, answer it
//! sync-cli pair --join <payload>
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use sync_types::{DeviceClass, VectorSpace};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod session;
mod store;

use commands::digests::NewDigest;
use commands::{digests, init, inspect, pair, status};

/// CLI tool for pairing and syncing BrainPlus devices.
#[derive(Parser, Debug)]
#[command(name = "sync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for device identity and digests
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Client settings file (default: sync.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay WebSocket URL override
    #[arg(long, global = true)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize device identity
    Init {
        /// Device name
        #[arg(long, short)]
        name: String,

        /// Device form factor
        #[arg(long, value_enum, default_value = "desktop")]
        class: ClassArg,

        /// Embedding model identifier
        #[arg(long, default_value = "all-MiniLM-L6-v2")]
        model: String,

        /// Embedding dimension
        #[arg(long, default_value = "384")]
        dimension: u32,

        /// Inference backend
        #[arg(long, default_value = "onnx")]
        backend: String,
    },

    /// Add or replace a digest in the local history
    Add {
        /// Page URL
        url: String,

        /// Page title
        #[arg(long)]
        title: Option<String>,

        /// Relevance score between 0 and 1
        #[arg(long, default_value = "0.5")]
        relevance: f64,

        /// Keywords (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },

    /// List the local history
    List,

    /// Start a sync session or answer one
    Pair {
        /// Start a session and display the pairing payload
        #[arg(long, conflicts_with = "join")]
        create: bool,

        /// Answer a session with the payload shown by the other device
        #[arg(long, conflicts_with = "create")]
        join: Option<String>,
    },

    /// Decode and check a pairing payload
    Inspect {
        /// Payload link or JSON
        payload: String,
    },

    /// Show device and sync status
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClassArg {
    Desktop,
    Mobile,
}

impl From<ClassArg> for DeviceClass {
    fn from(arg: ClassArg) -> Self {
        match arg {
            ClassArg::Desktop => DeviceClass::Desktop,
            ClassArg::Mobile => DeviceClass::Mobile,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;

    let sync_config =
        config::load_sync_config(&data_dir, cli.config.as_deref(), cli.relay.as_deref())?;

    match cli.command {
        Commands::Init {
            name,
            class,
            model,
            dimension,
            backend,
        } => {
            let space = VectorSpace::new(model, dimension, backend);
            init::run(&data_dir, &name, class.into(), space).await?;
        }
        Commands::Add {
            url,
            title,
            relevance,
            keywords,
        } => {
            let new = NewDigest {
                url,
                title,
                relevance,
                keywords,
            };
            digests::add(&data_dir, new).await?;
        }
        Commands::List => {
            digests::list(&data_dir).await?;
        }
        Commands::Pair { create, join } => {
            if create {
                pair::create(&data_dir, sync_config).await?;
            } else if let Some(code) = join {
                pair::join(&data_dir, sync_config, &code).await?;
            } else {
                anyhow::bail!("Must specify either --create or --join");
            }
        }
        Commands::Inspect { payload } => {
            inspect::run(&payload)?;
        }
        Commands::Status => {
            status::run(&data_dir, &sync_config).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for sync-cli.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "brainplus", "sync-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pair_flags_conflict() {
        let result = Cli::try_parse_from(["sync-cli", "pair", "--create", "--join", "abc"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_relay_override_parses() {
        let cli = Cli::try_parse_from(["sync-cli", "status", "--relay", "ws://r:1/ws"]).unwrap();
        assert_eq!(cli.relay.as_deref(), Some("ws://r:1/ws"));
        assert!(matches!(cli.command, Commands::Status));
    }
}
