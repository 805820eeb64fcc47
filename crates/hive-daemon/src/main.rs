//! Hive command-line entry point.
//!
//! Binary name: `hive`
//!
//! Parses CLI arguments, wires the file-backed services from the data
//! directory, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use hive_observe::TracingOptions;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    hive_observe::init_tracing_with(TracingOptions {
        json: cli.log_json,
        otel: cli.otel,
        filter: Some(cli.log_filter()),
    });

    let result = dispatch(cli).await;
    hive_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.data_dir.clone()).await?;

    match cli.command {
        Commands::Run { agent, message } => {
            cli::chat::run(&state, &agent, &message, cli.json).await?;
        }
        Commands::Chat {
            agent,
            session,
            image,
            message,
        } => {
            cli::chat::chat(&state, &agent, session, image, message, cli.json).await?;
        }
        Commands::Session { action } => {
            cli::session::handle(&state, action, cli.json).await?;
        }
        Commands::Task { action } => {
            cli::task::handle(&state, action, cli.json).await?;
        }
    }

    Ok(())
}
