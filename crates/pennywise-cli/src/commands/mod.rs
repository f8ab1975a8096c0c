//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, open_pipeline, argument parsing)
//! - `ingest` - SMS ingestion, backup import, reprocessing and enrichment
//! - `raw` - Raw item listing, statistics and deletion
//! - `reports` - Summary and export commands
//! - `serve` - Web server command
//! - `status` - Database and AI backend status
//! - `transactions` - Transaction commands (list, show, add, edit, delete)

pub mod core;
pub mod ingest;
pub mod raw;
pub mod reports;
pub mod serve;
pub mod status;
pub mod transactions;

// Re-export command functions for main.rs
pub use core::*;
pub use ingest::*;
pub use raw::*;
pub use reports::*;
pub use serve::*;
pub use status::*;
pub use transactions::*;

use pennywise_core::models::Direction;
use rust_decimal::Decimal;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Signed, colored amount: red for money out, green for money in
pub fn format_amount(amount: Decimal, direction: Direction) -> String {
    match direction {
        Direction::Debit => format!("\x1b[31m-{:.2}\x1b[0m", amount),
        Direction::Credit => format!("\x1b[32m+{:.2}\x1b[0m", amount),
        Direction::Unknown => format!("{:.2}", amount),
    }
}
