mod app;
mod cli;
mod db;
mod paths;

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Command;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let interactive = matches!(cli.command, Some(Command::Tui) | None);
    init_tracing(interactive)?;
    app::run(cli)
}

fn init_tracing(interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env("LOOPTUBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("looptube=info,warn"));

    // The TUI owns the terminal, so its logs go to a file instead.
    let writer = if interactive {
        let path = paths::log_file_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        BoxMakeWriter::new(Mutex::new(file))
    } else {
        BoxMakeWriter::new(io::stderr)
    };

    let format = env::var("LOOPTUBE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(writer))
            .init(),
        _ => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(!interactive)
                    .with_writer(writer),
            )
            .init(),
    }
    Ok(())
}
