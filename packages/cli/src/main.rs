#![allow(clippy::multiple_crate_versions)]

//! vizobs - command-line interface for viz-observer.
//!
//! Runs scripted scenarios against a headless document and prints the
//! geometry changes every subscriber receives.

mod commands;
mod error;
mod output;

use clap::Parser;
use commands::Cli;
use tracing_subscriber::EnvFilter;

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    if let Err(err) = cli.execute() {
        eprintln!("vizobs: {err}");
        std::process::exit(1);
    }
}
