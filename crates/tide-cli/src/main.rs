use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod remote;

const DEFAULT_LOG_FILTER: &str = "info,tide=debug,tidegrid=debug";

#[derive(Parser)]
#[command(
    name = "tide",
    about = "Tidegrid: live mirrors of locally persisted, remotely synced tables",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a tide.toml scaffold mirroring one table.
    Init {
        #[arg(short, long)]
        table: String,
        #[arg(short, long, default_value = "tide.toml")]
        out: PathBuf,
    },
    /// Mirror every configured table, pull from a JSON snapshot remote and
    /// report the resulting mirror sizes.
    Replay {
        #[arg(short, long, default_value = "tide.toml")]
        config: PathBuf,
        /// JSON file shaped `{ "<table>": [<record>, ...] }`.
        #[arg(short, long)]
        remote: PathBuf,
    },
    /// Print the stored rows as JSON.
    Inspect {
        #[arg(short, long, default_value = "tide.toml")]
        config: PathBuf,
        /// Only this table (default: every stored table).
        #[arg(short, long)]
        table: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Init { table, out } => commands::init::run(&table, &out),
        Command::Replay { config, remote } => commands::replay::run(&config, &remote).await,
        Command::Inspect { config, table } => commands::inspect::run(&config, table.as_deref()),
    }
}
