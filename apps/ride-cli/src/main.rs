//! # ride-cli
//!
//! Command-line interface for the ride lifecycle engine.
//!
//! - `ride create/accept/start/complete/cancel` — drive a ride through its lifecycle
//! - `ride show/list` — inspect rides visible to the caller
//! - `ride driver register/list` — manage driver profiles
//! - `ride reconcile` — repair driver credits that failed after completion
//!
//! State lives under `<project-root>/.ride/`. Every command that acts as a
//! user needs a bearer token (`--token` or `RIDE_TOKEN`) listed in
//! `.ride/config.toml`.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{LoggingSettings, RideConfig, RideSettings};

/// Ride lifecycle CLI — request, assign and track rides.
#[derive(Parser)]
#[command(name = "ride", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Bearer token identifying the caller.
    #[arg(long, env = "RIDE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Ride(commands::ride::RideCommands),
    /// Manage driver profiles.
    Driver {
        #[command(subcommand)]
        command: commands::driver::DriverCommands,
    },
    /// Credit drivers for completed rides whose credit failed.
    Reconcile,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = RideConfig::for_project(&project_root);
    let settings = RideSettings::load_or_default(&config.config_file)?;
    init_tracing(&settings.logging)?;

    let session = commands::Session::open(&config, &settings, cli.token.as_deref())?;
    let result = match &cli.command {
        Commands::Ride(command) => commands::ride::execute(command, &session),
        Commands::Driver { command } => commands::driver::execute(command, &session),
        Commands::Reconcile => commands::reconcile::execute(&session),
    };
    session.finish();
    result
}

/// Logs go to stderr so they don't interleave with command output.
fn init_tracing(logging: &LoggingSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "ride_lifecycle={level},ride_store_sqlite={level},ride={level}",
            level = logging.level
        ))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
