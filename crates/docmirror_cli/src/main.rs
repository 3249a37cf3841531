//! docmirror CLI
//!
//! Command-line tools for keeping a SQLite table in sync with a document
//! store.
//!
//! A workspace directory (`--path`) holds three files:
//!
//! - `store.cbor` - snapshot of the document store
//! - `target.db` - SQLite database with one table per target
//! - `state.cbor` - persisted sync state per store/target pair
//!
//! # Commands
//!
//! - `store` - Import, update, delete, list and purge documents
//! - `sync` - Run one sync pass into a SQLite table
//! - `state` - Show or reset persisted sync state
//! - `target` - Display target table statistics

mod commands;
mod workspace;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docmirror command-line tools.
#[derive(Parser)]
#[command(name = "docmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the workspace directory
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
    /// Manage documents in the store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Run one sync pass into a target table
    Sync {
        /// Selection formula, e.g. `Form = "Person"`
        #[arg(long)]
        predicate: String,

        /// Target table name
        #[arg(short, long, default_value = "documents")]
        table: String,

        /// Comma-separated fields to project (all fields if omitted)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Abort the pass after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Advance the watermark even if some operations failed
        #[arg(long)]
        advance_on_failure: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect or reset persisted sync state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Inspect a target table
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Import a JSON array of documents
    Import {
        /// JSON file to import
        file: PathBuf,

        /// Store ID used when the workspace has no store yet
        #[arg(long, default_value = "documents")]
        store_id: String,
    },

    /// Set fields on a document (`Name=value`; values are JSON or text)
    Update {
        /// Document ID
        id: String,

        /// Field assignments
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Delete documents
    Delete {
        /// Document IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List documents
    List {
        /// Only list documents matching this formula
        #[arg(long)]
        predicate: Option<String>,

        /// Maximum number of documents to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop every tombstone written so far
    Purge,
}

#[derive(Subcommand)]
enum StateAction {
    /// Show persisted state for every pair
    Show {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the state of one pair; the next pass reconciles fully
    Reset {
        /// Target table name
        #[arg(short, long, default_value = "documents")]
        table: String,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    /// Display row counts for a target table
    Stats {
        /// Target table name
        #[arg(short, long, default_value = "documents")]
        table: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("docmirror CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("docmirror core v{}", docmirror_core::VERSION);
        }
        command => {
            let path = cli.path.ok_or("Workspace path required")?;
            let workspace = workspace::Workspace::open(&path)?;
            run(&workspace, command)?;
        }
    }

    Ok(())
}

fn run(
    workspace: &workspace::Workspace,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Store { action } => match action {
            StoreAction::Import { file, store_id } => {
                commands::store::import(workspace, &file, &store_id)?;
            }
            StoreAction::Update { id, assignments } => {
                commands::store::update(workspace, &id, &assignments)?;
            }
            StoreAction::Delete { ids } => {
                commands::store::delete(workspace, &ids)?;
            }
            StoreAction::List {
                predicate,
                limit,
                format,
            } => {
                commands::store::list(workspace, predicate.as_deref(), limit, &format)?;
            }
            StoreAction::Purge => {
                commands::store::purge(workspace)?;
            }
        },
        Commands::Sync {
            predicate,
            table,
            fields,
            timeout_ms,
            advance_on_failure,
            format,
        } => {
            let args = commands::sync::SyncArgs {
                predicate,
                table,
                fields,
                timeout_ms,
                advance_on_failure,
            };
            commands::sync::run(workspace, &args, &format)?;
        }
        Commands::State { action } => match action {
            StateAction::Show { format } => commands::state::show(workspace, &format)?,
            StateAction::Reset { table } => commands::state::reset(workspace, &table)?,
        },
        Commands::Target { action } => match action {
            TargetAction::Stats { table, format } => {
                commands::target::stats(workspace, &table, &format)?;
            }
        },
        Commands::Version => {}
    }

    Ok(())
}
