//! MacOdyssey CLI - Command-line interface for Odyssey model tools

pub mod commands;

use clap::Parser;
use commands::Commands;

#[derive(Parser)]
#[command(name = "macodyssey")]
#[command(about = "MacOdyssey: Odyssey engine model tools for KotOR", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Run the MacOdyssey CLI
pub fn run_cli() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    cli.command.execute()?;

    Ok(())
}
