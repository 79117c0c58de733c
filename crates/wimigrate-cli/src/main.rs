//! wimigrate - work item history migration tool.

mod args;
mod commands;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{Cli, Command, DEFAULT_LOG_FILTER};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Seed(args) => commands::seed(args).await?,
        Command::Replay(args) => {
            let report = commands::replay(args).await?;
            if !report.is_complete() {
                std::process::exit(2);
            }
        }
        Command::Status(args) => commands::status(args)?,
        Command::ExportMap(args) => commands::export_map(args)?,
    }
    Ok(())
}
