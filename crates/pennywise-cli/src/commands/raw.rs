//! Raw item command implementations (list, stats, delete)

use anyhow::Result;
use pennywise_core::db::Database;
use pennywise_core::models::RawItemStatus;

use super::truncate;

pub fn cmd_raw_list(db: &Database, owner: &str, status: Option<&str>, limit: i64) -> Result<()> {
    let status = status
        .map(|s| s.parse::<RawItemStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let items = db.list_raw_items(owner, status, limit, 0)?;
    if items.is_empty() {
        println!("No raw items found.");
        return Ok(());
    }

    println!();
    println!("📨 Raw Items");
    println!("   ─────────────────────────────────────────────────────────────");

    for stored in &items {
        let marker = match stored.status {
            RawItemStatus::Parsed => "✅",
            RawItemStatus::Fallback => "🔸",
            RawItemStatus::Failed => "❌",
            RawItemStatus::Pending => "⏳",
        };
        let linked = stored
            .transaction_id
            .map(|id| format!(" → tx {}", id))
            .unwrap_or_default();
        println!(
            "   {} [{}] {} │ {:<12} │ {}{}",
            marker,
            stored.id,
            stored.item.received_at.format("%Y-%m-%d %H:%M"),
            truncate(stored.item.sender.as_deref().unwrap_or("-"), 12),
            truncate(&stored.item.raw_text, 40),
            linked
        );
        if let Some(reason) = &stored.status_reason {
            println!("        {}", truncate(reason, 60));
        }
    }

    Ok(())
}

pub fn cmd_raw_stats(db: &Database, owner: &str) -> Result<()> {
    let stats = db.raw_item_stats(owner)?;

    println!();
    println!("📊 Parsing Statistics");
    println!("   ─────────────────────────────");
    println!("   Total:        {}", stats.total);
    println!("   Parsed:       {}", stats.parsed);
    println!("   Unparsed:     {}", stats.unparsed);
    println!("   Parsing rate: {:.2}%", stats.parsing_rate);

    if !stats.top_senders.is_empty() {
        println!();
        println!("   Top senders:");
        for sender in &stats.top_senders {
            println!("     {:<16} {}", sender.sender, sender.count);
        }
    }

    if stats.unparsed > 0 {
        println!();
        println!("   Run 'pennywise reprocess' to retry unparsed items.");
    }

    Ok(())
}

pub fn cmd_raw_delete(db: &Database, owner: &str, id: i64) -> Result<()> {
    if !db.delete_raw_item(owner, id)? {
        anyhow::bail!("Raw item {} not found", id);
    }
    println!("🗑️  Deleted raw item {}", id);
    Ok(())
}
