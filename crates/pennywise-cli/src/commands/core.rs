//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_pipeline` - Engine with config and AI backend from the environment
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pennywise_core::ai::{AIBackend, AIClient};
use pennywise_core::config::EngineConfig;
use pennywise_core::db::Database;
use pennywise_core::extract::parse_datetime;
use pennywise_core::Pipeline;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Engine config from --config, or the default override location
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => EngineConfig::load().context("Failed to load engine config"),
    }
}

/// Build the engine over an open database
///
/// The AI backend comes from the environment; without one every item
/// takes the pattern-matching fallback.
pub fn open_pipeline(db: Database, config_path: Option<&Path>) -> Result<Pipeline> {
    let config = load_engine_config(config_path)?;
    let ai = AIClient::from_env();
    match &ai {
        Some(client) => {
            tracing::debug!(model = client.model(), host = client.host(), "AI backend configured")
        }
        None => tracing::debug!("No AI backend configured, using fallback extraction"),
    }
    Ok(Pipeline::new(db, ai, config))
}

/// Parse a YYYY-MM-DD command-line date
pub fn parse_date_arg(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("Invalid {} date format (use YYYY-MM-DD)", flag))
}

/// Parse a command-line timestamp; anything the importer accepts is fine here
pub fn parse_datetime_arg(value: Option<&str>, flag: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .with_context(|| format!("Invalid {} value: {}", flag, raw)),
        None => Ok(None),
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Import a backup: pennywise import --file sms_backup.xml");
    println!("  2. Ingest one message: pennywise sms --text \"Rs 250 debited ...\"");
    println!("  3. Start the API: pennywise serve");

    Ok(())
}
