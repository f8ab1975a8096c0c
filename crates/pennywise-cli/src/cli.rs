//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pennywise - Turn bank SMS and statement exports into clean transactions
#[derive(Parser)]
#[command(name = "pennywise")]
#[command(about = "Transaction extraction and normalization engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "pennywise.db", global = true)]
    pub db: PathBuf,

    /// Owner whose data the command reads and writes
    #[arg(long, env = "PENNYWISE_OWNER", default_value = "default", global = true)]
    pub owner: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set PENNYWISE_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Engine config file (defaults to ~/.local/share/pennywise/config/engine.toml)
    #[arg(long, env = "PENNYWISE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Ingest a single SMS
    Sms {
        /// Message body
        #[arg(short, long)]
        text: String,

        /// Sender id (e.g. VM-HDFCBK)
        #[arg(short, long)]
        sender: Option<String>,

        /// When the message arrived (RFC 3339 or YYYY-MM-DD HH:MM:SS); defaults to now
        #[arg(long)]
        received_at: Option<String>,
    },

    /// Import a backup file (CSV, XML, TXT or JSON)
    Import {
        /// File to import
        #[arg(short, long)]
        file: PathBuf,

        /// File kind (detected from the extension if not specified)
        #[arg(short, long)]
        kind: Option<String>,

        /// Only check that the file can be imported
        #[arg(long)]
        validate_only: bool,
    },

    /// Re-run extraction over unparsed raw items
    Reprocess {
        /// Re-extract these raw items instead, whatever their status
        #[arg(long = "id")]
        ids: Vec<i64>,
    },

    /// Detect recurring payments and fill in missing categories
    Enrich,

    /// Manage transactions (list, show, add, edit, delete)
    Transactions {
        #[command(subcommand)]
        action: Option<TransactionsAction>,
    },

    /// Inspect stored raw items (list, stats, delete)
    Raw {
        #[command(subcommand)]
        action: Option<RawAction>,
    },

    /// Show spending summary
    Summary {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },

    /// Export transactions
    Export {
        /// Output format: csv or json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },

    /// Show database and AI backend status
    Status,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Accept requests without an x-owner-id header (for local development only)
        ///
        /// Requests without the header act as --owner. Do not use this flag when
        /// the server is not behind an authenticating proxy.
        #[arg(long)]
        no_owner_header: bool,
    },
}

#[derive(Subcommand)]
pub enum TransactionsAction {
    /// List transactions (newest first)
    List {
        /// Number of transactions to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,

        /// Number of transactions to skip
        #[arg(long, default_value = "0")]
        offset: i64,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// debit or credit
        #[arg(long)]
        direction: Option<String>,

        /// Merchant substring
        #[arg(long)]
        merchant: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Only recurring payments
        #[arg(long)]
        recurring: bool,

        /// Sort by: date or amount
        #[arg(long, default_value = "date")]
        sort: String,

        /// Sort order: asc or desc
        #[arg(long, default_value = "desc")]
        order: String,
    },

    /// Show one transaction
    Show {
        /// Transaction ID
        id: i64,
    },

    /// Add a transaction by hand
    Add {
        /// Amount (positive)
        #[arg(short, long)]
        amount: String,

        /// debit or credit
        #[arg(short, long, default_value = "debit")]
        direction: String,

        #[arg(short, long)]
        merchant: Option<String>,

        /// Category (keyword lookup if not specified)
        #[arg(short, long)]
        category: Option<String>,

        /// Date (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS); defaults to now
        #[arg(long)]
        date: Option<String>,

        /// Payment mode (upi, card, netbanking, ...)
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        reference: Option<String>,

        #[arg(long)]
        remarks: Option<String>,
    },

    /// Edit a transaction; edited fields are never overwritten automatically
    Edit {
        /// Transaction ID
        id: i64,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        merchant: Option<String>,

        #[arg(long)]
        remarks: Option<String>,

        /// Mark the transaction as failed (true/false)
        #[arg(long)]
        failed: Option<bool>,
    },

    /// Delete a transaction
    Delete {
        /// Transaction ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum RawAction {
    /// List raw items (newest first)
    List {
        /// Filter by status: pending, parsed, fallback, failed
        #[arg(short, long)]
        status: Option<String>,

        /// Number of items to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Parsing statistics and top senders
    Stats,

    /// Delete a raw item (its transaction is kept)
    Delete {
        /// Raw item ID
        id: i64,
    },
}
