//! CLI command definitions for the `hive` binary.

pub mod chat;
pub mod session;
pub mod task;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run Hive agents from the command line.
#[derive(Parser)]
#[command(name = "hive", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of plain text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to $HIVE_DATA_DIR, then ~/.hive).
    #[arg(long, global = true, env = "HIVE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `RUST_LOG`-style filter matching the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,hive=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one message against an agent without any history.
    Run {
        /// Agent ID from config.toml.
        #[arg(long, short)]
        agent: String,

        /// The message to send.
        message: String,
    },

    /// Send a message in a persistent session and stream the reply.
    Chat {
        #[arg(long, short)]
        agent: String,

        /// Session to continue. A new one is created when omitted.
        #[arg(long, short)]
        session: Option<String>,

        /// Attach an image as a data URI or base64 payload.
        #[arg(long)]
        image: Option<String>,

        message: String,
    },

    /// Inspect and maintain stored sessions.
    Session {
        #[command(subcommand)]
        action: session::SessionCommand,
    },

    /// Manage background tasks.
    Task {
        #[command(subcommand)]
        action: task::TaskCommand,
    },
}
