#![deny(unsafe_code)]

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ledgervault_core::AppContext;

use crate::commands::{info, login, register};

/// Command-line interface for LedgerVault user vaults
#[derive(Parser)]
#[command(name = "ledgervault")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Register a new user (prints the recovery secret once)
    ledgervault register alice

    # Log in with a password and show the vault summary
    ledgervault login alice

    # Log in with the recovery secret instead
    ledgervault login alice --recovery

    # Show identity directory statistics
    ledgervault info
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory holding the identity directory and vault files
    #[arg(long, env = "LEDGERVAULT_DATA_DIR", value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user and provision their vault
    Register(register::Args),

    /// Log in and show a summary of the unlocked vault
    Login(login::Args),

    /// Show identity directory statistics
    Info(info::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    tracing::debug!(data_dir = %data_dir.display(), "opening application context");

    let ctx = AppContext::open(&data_dir)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;

    match cli.command {
        Commands::Register(args) => register::execute(&ctx, &args),
        Commands::Login(args) => login::execute(&ctx, &args),
        Commands::Info(args) => info::execute(&ctx, &args),
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "LedgerVault", "ledgervault")
        .context("Could not determine a data directory; pass --data-dir")?;
    Ok(dirs.data_dir().to_path_buf())
}
