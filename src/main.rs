mod backend;
mod cache;
mod cli;
mod commands;
mod errors;
mod keys;
mod model;
mod normalize;
mod reconcile;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status(args) => commands::status::run(args),
        Commands::Get(args) => commands::get::run(args),
        Commands::Set(args) => commands::set::run(args),
        Commands::Migrate(args) => commands::migrate::run(args),
        Commands::Seed(args) => commands::seed::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
