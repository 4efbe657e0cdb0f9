//! Command-line entry point for paramcache.

use anyhow::Result;
use clap::Parser;
use paramcache_runtime::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
