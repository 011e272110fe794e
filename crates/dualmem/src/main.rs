//! dualmem - dual memory CLI
//!
//! Drives a memory directory from the shell: feed conversation turns into
//! the working memory, promote what a judge approves into the knowledge
//! store, and search both.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;
mod error;
mod judge;

use cli::Cli;

const DEFAULT_LOG_FILTER: &str = "dualmem=info,dualmem_sdk=info,dualmem_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable. RUST_LOG, when
    // set, replaces the defaults entirely.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    commands::execute(cli.command, &config).await
}
