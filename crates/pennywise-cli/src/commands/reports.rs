//! Report command implementations (summary, export)

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use pennywise_core::db::Database;
use pennywise_core::export::{ExportFormat, TransactionExportOptions};
use pennywise_core::models::Direction;

use super::{format_amount, parse_date_arg, truncate};

pub fn cmd_summary(
    db: &Database,
    owner: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    let from = parse_date_arg(from, "--from")?;
    let to = parse_date_arg(to, "--to")?;
    let summary = db.analytics_summary(owner, from, to)?;

    let period = match (summary.from, summary.to) {
        (Some(f), Some(t)) => format!("{} to {}", f, t),
        (Some(f), None) => format!("since {}", f),
        (None, Some(t)) => format!("until {}", t),
        (None, None) => "all time".to_string(),
    };

    println!();
    println!("📊 Summary ({})", period);
    println!("   ─────────────────────────────");
    println!("   Transactions: {}", summary.total_count);
    println!(
        "   Spent:        {}",
        format_amount(summary.total_debit, Direction::Debit)
    );
    println!(
        "   Received:     {}",
        format_amount(summary.total_credit, Direction::Credit)
    );
    println!("   Average:      {:.2}", summary.average_amount);
    if summary.failed_count > 0 {
        println!("   Failed:       {}", summary.failed_count);
    }
    if summary.recurring_count > 0 {
        println!("   Recurring:    {}", summary.recurring_count);
    }

    if !summary.top_categories.is_empty() {
        println!();
        println!("   Top categories:");
        for cat in &summary.top_categories {
            println!("     {:<20} {:>12.2}  ({})", cat.name, cat.amount, cat.count);
        }
    }

    if !summary.top_merchants.is_empty() {
        println!();
        println!("   Top merchants:");
        for merchant in &summary.top_merchants {
            println!(
                "     {:<20} {:>12.2}  ({})",
                truncate(&merchant.name, 20),
                merchant.amount,
                merchant.count
            );
        }
    }

    if !summary.monthly_trends.is_empty() {
        println!();
        println!("   Monthly:");
        for month in &summary.monthly_trends {
            println!(
                "     {}  out {:>12.2}  in {:>12.2}  ({})",
                month.month, month.debit, month.credit, month.count
            );
        }
    }

    Ok(())
}

pub fn cmd_export(
    db: &Database,
    owner: &str,
    format: &str,
    output: Option<&Path>,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    let format: ExportFormat = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let opts = TransactionExportOptions {
        from: parse_date_arg(from, "--from")?,
        to: parse_date_arg(to, "--to")?,
    };

    let rows = db.export_transactions(owner, &opts)?.len();
    let content = db.export(owner, format, &opts)?;

    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            file.write_all(content.as_bytes())?;
            println!("✅ Exported {} transactions to {}", rows, path.display());
        }
        None => {
            // Write to stdout
            print!("{}", content);
        }
    }

    Ok(())
}
