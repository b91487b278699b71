mod cli;
mod context;
mod engine;
mod error;
mod model;
mod orchestrator;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(&args)?;
    cli::run(args).await
}

/// Logs go to stderr, except under the TUI where they would corrupt the screen
/// and go to `<state-dir>/jobstream.log` instead.
fn init_tracing(args: &cli::Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);

    if args.is_tui() {
        let dir = cli::build_config(args).state_dir;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("jobstream.log"))
            .context("open log file")?;
        let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
        match args.log_format {
            cli::LogFormat::Json => builder.json().init(),
            cli::LogFormat::Text => builder.init(),
        }
    } else {
        let builder = builder.with_writer(std::io::stderr);
        match args.log_format {
            cli::LogFormat::Json => builder.json().init(),
            cli::LogFormat::Text => builder.init(),
        }
    }
    Ok(())
}
