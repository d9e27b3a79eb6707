mod bootstrap_helpers;
mod cli_args;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::commands::run_cli;

fn main() -> Result<()> {
    init_tracing();
    run_cli(Cli::parse())
}
