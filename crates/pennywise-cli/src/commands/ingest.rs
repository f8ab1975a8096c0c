//! Ingestion command implementations (sms, import, reprocess, enrich)

use std::path::Path;

use anyhow::{Context, Result};
use pennywise_core::models::{BatchReport, SmsInput};
use pennywise_core::{CancelToken, Pipeline};

use super::{format_amount, parse_datetime_arg, truncate};

/// Failures shown before the list is cut short
const MAX_FAILURES_SHOWN: usize = 10;

pub async fn cmd_sms(
    pipeline: &Pipeline,
    owner: &str,
    text: &str,
    sender: Option<&str>,
    received_at: Option<&str>,
) -> Result<()> {
    let mut input = SmsInput::new(text);
    if let Some(sender) = sender {
        input = input.with_sender(sender);
    }
    if let Some(at) = parse_datetime_arg(received_at, "--received-at")? {
        input = input.with_received_at(at);
    }

    let outcome = pipeline
        .ingest_sms(owner, &input)
        .await
        .context("Failed to ingest SMS")?;

    match (&outcome.transaction, outcome.stored) {
        (Some(tx), true) => {
            println!("✅ Stored transaction {}", tx.id);
            println!(
                "   {} │ {:>12} │ {} │ {}",
                tx.ts.format("%Y-%m-%d %H:%M"),
                format_amount(tx.amount, tx.direction),
                truncate(tx.merchant.as_deref().unwrap_or("-"), 30),
                tx.category
            );
            println!(
                "   Method: {} (confidence {:.2})",
                tx.extraction_method, tx.confidence
            );
        }
        (Some(tx), false) => {
            println!(
                "ℹ️  Not stored: {}",
                outcome.skipped_reason.as_deref().unwrap_or("already ingested")
            );
            println!("   Existing transaction: {}", tx.id);
        }
        (None, _) => {
            println!(
                "⏭️  Not stored: {}",
                outcome.skipped_reason.as_deref().unwrap_or("not a transaction")
            );
        }
    }

    Ok(())
}

pub async fn cmd_import(
    pipeline: &Pipeline,
    owner: &str,
    file: &Path,
    kind: Option<&str>,
    validate_only: bool,
) -> Result<()> {
    let kind = match kind {
        Some(k) => k.to_string(),
        None => file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .context("Cannot tell the file kind from its extension; pass --kind")?,
    };

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let validation = pipeline
        .validate_backup(&kind, &content)
        .with_context(|| format!("{} is not an importable backup", file.display()))?;

    println!(
        "📂 {} ({}, {} bytes{})",
        file.display(),
        validation.file_kind,
        validation.decoded_bytes,
        if validation.was_base64 {
            ", base64 decoded"
        } else {
            ""
        }
    );

    if validate_only {
        println!("✅ File is valid and ready to import");
        return Ok(());
    }

    // Ctrl+C stops the import; rows already stored stay stored
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let report = pipeline
        .ingest_backup_file_with_cancel(owner, validation.file_kind, &content, &cancel)
        .await;
    watcher.abort();
    let report = report.context("Import failed")?;

    print_report("📥 Import", &report);
    Ok(())
}

pub async fn cmd_reprocess(pipeline: &Pipeline, owner: &str, ids: &[i64]) -> Result<()> {
    let report = if ids.is_empty() {
        println!("🔄 Reprocessing unparsed raw items...");
        pipeline.reprocess_unparsed(owner).await?
    } else {
        println!("🔄 Re-extracting {} raw item(s)...", ids.len());
        pipeline.reprocess_items(owner, ids).await?
    };

    if report.processed == 0 {
        println!("   Nothing to reprocess.");
        return Ok(());
    }

    print_report("🔄 Reprocess", &report);
    Ok(())
}

pub async fn cmd_enrich(pipeline: &Pipeline, owner: &str) -> Result<()> {
    println!("🔍 Running enrichment...");
    let report = pipeline.run_enrichment(owner).await?;

    println!();
    println!("   Recurring groups: {}", report.recurring_groups_found);
    println!("   Categorized:      {}", report.categorized);
    Ok(())
}

fn print_report(title: &str, report: &BatchReport) {
    println!();
    println!("{} Results", title);
    println!("   ─────────────────────────────");
    println!("   Processed:  {}", report.processed);
    println!("   Stored:     {}", report.stored);
    println!("   Duplicates: {}", report.duplicates);
    println!("   Skipped:    {}", report.skipped);
    println!("   Failed:     {}", report.failures.len());

    if !report.failures.is_empty() {
        println!();
        for failure in report.failures.iter().take(MAX_FAILURES_SHOWN) {
            println!("   ❌ #{}: {}", failure.index, truncate(&failure.reason, 60));
        }
        if report.failures.len() > MAX_FAILURES_SHOWN {
            println!(
                "   ... and {} more",
                report.failures.len() - MAX_FAILURES_SHOWN
            );
        }
    }

    if report.cancelled {
        println!();
        println!("⚠️  Cancelled: items stored before the interruption were kept");
    }
}
