//! celld — the cellgrid daemon.
//!
//! Single binary that assembles the cellgrid subsystems:
//! - State store (redb)
//! - Cell/tenant lifecycle with command-backed provisioning
//! - Deployment orchestrator + scheduler worker
//! - REST API + routing diagnostics edge
//!
//! # Usage
//!
//! ```text
//! celld serve --config /etc/cellgrid/cellgrid.toml --port 8080
//! celld route --authorization "Bearer <jwt>" --mapping-file routes.json --path /orders
//! celld init --output cellgrid.toml
//! ```

mod route;
mod serve;

use std::path::{Path, PathBuf};

use cell_core::CellgridConfig;
use cell_core::config::LogFormat;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "celld", about = "cellgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the management API and run the rollout scheduler.
    Serve {
        /// Path to cellgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `[api] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[state] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Run one routing decision and print it.
    Route {
        /// Authorization header value.
        #[arg(long)]
        authorization: String,

        /// Request path and query to route.
        #[arg(long, default_value = "/")]
        path: String,

        /// JSON mapping snapshot to route against.
        #[arg(long, conflicts_with = "data_dir")]
        mapping_file: Option<PathBuf>,

        /// Data directory whose state store holds the mapping table.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a default configuration file.
    Init {
        #[arg(long, default_value = "cellgrid.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CellgridConfig> {
    match path {
        Some(path) => CellgridConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display())),
        None => Ok(CellgridConfig::default()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,celld=debug,cellgrid=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.state.data_dir = data_dir;
            }
            init_tracing(config.log.format);
            serve::run_serve(config).await
        }
        Command::Route {
            authorization,
            path,
            mapping_file,
            data_dir,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(config.log.format);
            let source = match (mapping_file, data_dir) {
                (Some(file), _) => route::Source::File(file),
                (None, Some(dir)) => route::Source::Store(dir),
                (None, None) => route::Source::Store(config.state.data_dir.clone()),
            };
            let decision = route::decide(&config.router, source, &authorization, &path).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(())
        }
        Command::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            std::fs::write(&output, CellgridConfig::default().to_toml_string()?)?;
            init_tracing(LogFormat::Text);
            info!(path = %output.display(), "default configuration written");
            Ok(())
        }
    }
}
