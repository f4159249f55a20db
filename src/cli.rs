//! Command line interface of the `seller-queue` binary.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::queue::QueueAction;

/// Round-robin seller queue for multi-store sales floors.
#[derive(Debug, Parser)]
#[command(name = "seller-queue", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to ./seller-queue.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store the command acts on (overrides `default_store`).
    #[arg(long, short, global = true)]
    pub store: Option<String>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database schema.
    Init,

    /// Create or replace a login for the selected store.
    AddLogin {
        /// Login name or email (the part before `@` is used).
        login: String,
        password: String,
    },

    /// Import sellers from a CSV file with a `name` column.
    Import { csv: PathBuf },

    /// Register a seller (starts out of the queue).
    AddSeller { name: String },

    /// Delete a seller by name.
    RemoveSeller { name: String },

    /// Show the queue and every seller's status.
    List,

    /// Apply a queue action to a seller.
    Act {
        #[arg(value_enum)]
        action: QueueAction,

        seller: String,

        /// Free-text note stored in the history (required for `budget`).
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Rewrite queue positions to 1..N.
    Renumber,

    /// Show the history log, newest first.
    History {
        /// Only entries of this seller.
        #[arg(long)]
        seller: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// List budgets, newest first.
    Budgets,

    /// Services per seller for one day (defaults to today, UTC).
    Daily {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Services per seller for one month (defaults to the current month).
    Monthly {
        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        month: Option<u32>,
    },

    /// Interactive terminal dashboard.
    Tui,
}
