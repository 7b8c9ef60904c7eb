//! `contactdb` command-line entry point.
//!
//! # Responsibility
//! - Drive the two-request merge protocol against a database file.
//! - Print machine-readable JSON for every command.

use clap::Parser;

mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    commands::run_command(cli)
}
