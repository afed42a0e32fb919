//! keygridd: the keygrid daemon.
//!
//! Single binary that assembles the partition subsystems:
//! - State store (redb) holding nodes and node ranges
//! - Configuration store (in memory, or etcd with the `etcd` feature)
//! - Watch registry
//! - Partition manager with startup republication
//! - Routing cache and resolver
//! - Optional in-process storage nodes
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! keygridd standalone --config keygrid.toml --port 8443 --node node-a --node node-b
//! keygridd default-config > keygrid.toml
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keygrid_core::KeygridConfig;

const DEFAULT_LOG_FILTER: &str = "info,keygridd=debug,keygrid_control=debug,keygrid_node=debug";

#[derive(Parser)]
#[command(name = "keygridd", about = "keygrid partition daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run control plane, routing API and any embedded nodes in one process.
    Standalone {
        /// Path to keygrid.toml. Defaults apply to anything it leaves out.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides server.port).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides server.data_dir).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Host an in-process storage node with this uuid. Repeatable.
        #[arg(long = "node")]
        nodes: Vec<String>,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::DefaultConfig => {
            print!("{}", KeygridConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::Standalone {
            config,
            port,
            data_dir,
            nodes,
        } => {
            init_tracing(cli.log_json);

            let mut config = match config {
                Some(path) => KeygridConfig::from_file(&path)?,
                None => KeygridConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }

            standalone::run_standalone(config, nodes).await
        }
    }
}
