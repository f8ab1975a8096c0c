//! Status command implementation

use std::path::Path;

use anyhow::Result;
use pennywise_core::ai::{AIBackend, AIClient};
use pennywise_core::db::{Database, TransactionFilter, DB_KEY_ENV};

use super::open_db;

pub async fn cmd_status(db_path: &Path, owner: &str, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Pennywise Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => print_owner_stats(&db, owner),
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    print_ai_status(AIClient::from_env().as_ref()).await;
    println!();
    Ok(())
}

fn print_owner_stats(db: &Database, owner: &str) {
    println!();
    println!("   Owner: {}", owner);
    if let Ok(count) = db.count_by_owner(owner, &TransactionFilter::new()) {
        println!("   Transactions: {}", count);
    }
    if let Ok(stats) = db.raw_item_stats(owner) {
        println!(
            "   Raw items: {} ({} unparsed, {:.2}% parsed)",
            stats.total, stats.unparsed, stats.parsing_rate
        );
    }
}

/// Report whether the configured AI backend answers
pub async fn print_ai_status(ai: Option<&AIClient>) {
    match ai {
        Some(client) => {
            let healthy = client.health_check().await;
            let marker = if healthy { "✅" } else { "❌" };
            println!(
                "   {} AI backend: {} at {}{}",
                marker,
                client.model(),
                client.host(),
                if healthy { "" } else { " (unreachable)" }
            );
            if !healthy {
                println!("      Items will use fallback extraction until it is reachable");
            }
        }
        None => {
            println!("   💡 AI backend: not configured (fallback extraction only)");
            println!("      Set OLLAMA_HOST or AI_BACKEND=openai_compatible to enable");
        }
    }
}
