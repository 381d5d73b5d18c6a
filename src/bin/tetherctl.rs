//! Operator tool for inspecting a shim's on-disk state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::fifo::Fifo;
use tether::state;

#[derive(Parser, Debug)]
#[command(
    name = "tetherctl",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_HASH"), " ", env!("BUILD_DATE"), ")"
    ),
    about = "Inspect tether shim state on disk"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the persisted shim state record as JSON
    State {
        /// Shim root directory containing state.json
        root: PathBuf,
    },
    /// Check that a path is a named pipe usable for shim stdio
    Fifo {
        /// Path to check
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tether::config::load_config();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::State { root } => {
            let st = state::load(&root)
                .with_context(|| format!("loading shim state from {}", root.display()))?;
            info!("state loaded - runtime={}, shim={}", st.runtime, st.shim);
            println!("{}", serde_json::to_string_pretty(&st)?);
        }
        Commands::Fifo { path } => {
            let fifo = Fifo::open(&path)
                .with_context(|| format!("validating {}", path.display()))?;
            println!("{}", fifo.path().display());
        }
    }
    Ok(())
}
