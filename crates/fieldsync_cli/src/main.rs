//! FieldSync CLI
//!
//! Command-line tools for inspecting and repairing a device event store.
//!
//! # Commands
//!
//! - `inspect` - Display scope, event and sync state counts
//! - `dump-scope` - Print a scope and the raw JSON of its events
//! - `progress` - Print down-sync cursors and up-sync state
//! - `close-session` - Close the open session so it can be uploaded
//! - `compact` - Rewrite the store files without dead records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldSync command-line store tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display scope, event and sync state counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a scope and the raw JSON of its events
    DumpScope {
        /// Scope id
        id: String,
    },

    /// Print down-sync cursors and up-sync state
    Progress {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Close the open session so the next sync uploads it
    CloseSession {
        /// Mark the session as timed out
        #[arg(long)]
        timed_out: bool,
    },

    /// Rewrite the store files without dead records
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DumpScope { id } => {
            let path = cli.path.ok_or("Store path required for dump-scope")?;
            commands::dump_scope::run(&path, &id)?;
        }
        Commands::Progress { format } => {
            let path = cli.path.ok_or("Store path required for progress")?;
            commands::progress::run(&path, &format)?;
        }
        Commands::CloseSession { timed_out } => {
            let path = cli.path.ok_or("Store path required for close-session")?;
            commands::close_session::run(&path, timed_out)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
