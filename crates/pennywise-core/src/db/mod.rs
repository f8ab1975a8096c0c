//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `raw_items` - Raw item audit trail and processing status
//! - `transactions` - Canonical transaction storage, upserts, user edits
//! - `transaction_filter` - Dynamic WHERE clause builder for listing
//! - `analytics` - Per-owner summaries

use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod analytics;
mod raw_items;
mod transaction_filter;
mod transactions;

pub use raw_items::RawItemInsert;
pub use transaction_filter::{FilterResult, SortField, SortOrder, TransactionFilter};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "PENNYWISE_DB_KEY";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"pennywise-salt-1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Storage form of a timestamp (UTC, second precision)
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Minute bucket used by duplicate detection
pub(crate) fn minute_key(dt: &DateTime<Utc>) -> String {
    dt.format(MINUTE_FORMAT).to_string()
}

/// Parse a stored timestamp
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `PENNYWISE_DB_KEY` to be set. Use `new_unencrypted()` for
    /// development and testing.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let manager = match passphrase {
            Some(pass) => {
                let key_pragma = format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?);
                manager.with_init(move |conn| {
                    conn.execute_batch(&key_pragma)?;
                    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
                })
            }
            None => manager.with_init(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            }),
        };
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because every pooled
    /// connection to `:memory:` would see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "pennywise_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block writers
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Raw items (every SMS / file record as received)
            CREATE TABLE IF NOT EXISTS raw_items (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL,
                source_kind TEXT NOT NULL,             -- sms, csv_row, xml_node, txt_line, json_object
                raw_text TEXT NOT NULL,
                structured_fields TEXT,                -- JSON object for file rows
                sender TEXT,
                received_at DATETIME NOT NULL,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending', -- pending, parsed, fallback, failed
                status_reason TEXT,
                transaction_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(owner_id, fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_raw_items_owner_status ON raw_items(owner_id, status);
            CREATE INDEX IF NOT EXISTS idx_raw_items_sender ON raw_items(owner_id, sender);

            -- Transactions (canonical records)
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL,
                source_id INTEGER REFERENCES raw_items(id) ON DELETE SET NULL,
                ts DATETIME NOT NULL,
                ts_minute TEXT NOT NULL,               -- duplicate detection bucket
                amount TEXT NOT NULL,                  -- canonical two-decimal string
                direction TEXT NOT NULL,
                merchant TEXT,
                category TEXT NOT NULL DEFAULT 'uncategorized',
                payment_mode TEXT,
                reference_number TEXT,
                account_hint TEXT,
                bank_hint TEXT,
                remarks TEXT,
                failed BOOLEAN NOT NULL DEFAULT 0,
                recurring_group_id TEXT,
                confidence REAL NOT NULL DEFAULT 0,
                extraction_method TEXT NOT NULL,       -- ai, fallback, manual
                classification_reason TEXT,
                user_edited TEXT NOT NULL DEFAULT '[]', -- JSON array of field names
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(owner_id, source_id)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_owner_ts ON transactions(owner_id, ts);
            CREATE INDEX IF NOT EXISTS idx_transactions_dedup ON transactions(owner_id, amount, ts_minute);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(owner_id, category);
            CREATE INDEX IF NOT EXISTS idx_transactions_recurring ON transactions(recurring_group_id);
            "#,
        )?;

        info!(path = %self.db_path, "Database migrations complete");
        Ok(())
    }
}
