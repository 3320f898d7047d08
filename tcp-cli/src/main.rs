// tcp-cli: Operator entry point
// Exit codes: 0 success, 1 integrity failure, 2 config error, 3 runtime error.

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;
mod error;

use clap::{Parser, Subcommand};
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "tcp",
    about = "Tool Capability Protocol operator CLI",
    version
)]
struct Cli {
    /// Configuration file (defaults to $TCP_CONFIG, then ~/.tcp/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print epoch, supported variants, and the timing_ok invariant
    Status {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute the audit chain from genesis
    VerifyLog {
        /// Audit log directory
        path: PathBuf,
    },
    /// Stage fresh validator keys for a new epoch
    RotateKeys {
        /// The epoch the staged keys belong to; must exceed the current one
        epoch: u64,
    },
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = tcp_config::load_config(cli.config.as_deref())?;
    init_tracing(&config.node.log_filter);

    match cli.command {
        Command::Status { json } => commands::status::run(&config, json),
        Command::VerifyLog { path } => commands::verify_log::run(&path),
        Command::RotateKeys { epoch } => commands::rotate_keys::run(&config, epoch),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
