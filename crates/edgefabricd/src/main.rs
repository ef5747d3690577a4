//! edgefabricd — the edge fabric daemon.
//!
//! Single binary that assembles every fabric subsystem:
//! - Authority store (redb)
//! - Node registry, seeded from the config's `[[nodes]]`
//! - Health aggregator + offline sweeper
//! - Task queue + dispatch loop
//! - Local cache + periodic sync rounds against the authority
//!
//! # Usage
//!
//! ```text
//! edgefabricd standalone --config fabric.toml --data-dir /var/lib/edgefabric
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use edgefabric_core::FabricConfig;

const DEFAULT_LOG_FILTER: &str = "info,edgefabricd=debug,edgefabric=debug";

#[derive(Parser)]
#[command(name = "edgefabricd", about = "Edge fabric daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process, with the configured nodes
    /// executing tasks locally.
    Standalone {
        /// Fabric configuration file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the authority store.
        #[arg(long, default_value = "/var/lib/edgefabric")]
        data_dir: PathBuf,

        /// JSON array of task submissions to enqueue at startup.
        #[arg(long)]
        tasks: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            data_dir,
            tasks,
        } => {
            let config = match config {
                Some(path) => FabricConfig::from_file(&path)?,
                None => FabricConfig::default(),
            };
            standalone::run_standalone(config, data_dir, tasks).await
        }
    }
}
