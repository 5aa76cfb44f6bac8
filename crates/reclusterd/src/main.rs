//! reclusterd — the Recluster daemon.
//!
//! Single binary that assembles the controller:
//! - State store (redb)
//! - Lifecycle planner + backend adapter
//! - External feed syncer
//!
//! # Usage
//!
//! ```text
//! reclusterd run --config /etc/recluster/reclusterd.toml
//! reclusterd plan --snapshot cluster.json --now 2026-03-10T23:00:00Z
//! reclusterd load --data-dir /var/lib/recluster --file cluster.json
//! ```

mod daemon;
mod oneshot;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reclusterd=debug,recluster=debug";

#[derive(Parser)]
#[command(name = "reclusterd", about = "Recluster placement and node-lifecycle controller")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller loop and feed syncer until Ctrl-C.
    Run {
        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Plan one step over a JSON snapshot and print the actions.
    Plan {
        /// Snapshot document: `{"workloads": [...], "nodes": [...], "policies": [...]}`.
        #[arg(long)]
        snapshot: PathBuf,

        /// Evaluation time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<String>,

        /// Idle cooldown, e.g. "5m".
        #[arg(long)]
        idle_cooldown: Option<String>,

        /// Clock offset for schedule windows, e.g. "+02:00".
        #[arg(long)]
        utc_offset: Option<String>,
    },

    /// Import nodes, policies and workloads into the state store.
    Load {
        #[arg(long, default_value = "/var/lib/recluster")]
        data_dir: PathBuf,

        /// Snapshot-shaped JSON document to import.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, data_dir } => daemon::run(config, data_dir).await,
        Command::Plan {
            snapshot,
            now,
            idle_cooldown,
            utc_offset,
        } => {
            let out = oneshot::plan(&snapshot, now.as_deref(), idle_cooldown.as_deref(), utc_offset.as_deref())?;
            println!("{out}");
            Ok(())
        }
        Command::Load { data_dir, file } => {
            let summary = oneshot::load(&data_dir, &file)?;
            println!(
                "loaded {} nodes, {} policies, {} workloads ({} gated)",
                summary.nodes, summary.policies, summary.workloads, summary.gated
            );
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // Logs go to stderr so `plan` output stays machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
