//! govern: reconcile policy sets and module sharing against a TFE-style API.
//!
//! # Usage
//!
//! ```text
//! govern plan    [--manifest <path>] [--state <path>]
//! govern apply   [--manifest <path>] [--state <path>] [--timeout <secs>]
//! govern refresh [--state <path>] [--timeout <secs>]
//! govern destroy [--state <path>] [--timeout <secs>]
//! govern status  [--state <path>] [--json]
//! govern import  <key> <policy-set-id> [--manifest <path>] [--state <path>]
//! ```
//!
//! The remote is configured through `TFE_ADDRESS` and `TFE_TOKEN`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs, destroy::DestroyArgs, import::ImportArgs, plan::PlanArgs,
    refresh::RefreshArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "govern",
    version,
    about = "Reconcile policy sets and organization module sharing",
    long_about = None,
)]
struct Cli {
    /// Log remote calls and reconcile steps to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what apply would change, without contacting the remote.
    Plan(PlanArgs),

    /// Converge the remote onto the manifest.
    Apply(ApplyArgs),

    /// Re-read every recorded resource and report drift.
    Refresh(RefreshArgs),

    /// Delete every recorded resource.
    Destroy(DestroyArgs),

    /// Summarize the recorded state.
    Status(StatusArgs),

    /// Record an existing remote policy set under a manifest key.
    Import(ImportArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Plan(args) => args.run(),
        Commands::Apply(args) => args.run(),
        Commands::Refresh(args) => args.run(),
        Commands::Destroy(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Import(args) => args.run(),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
