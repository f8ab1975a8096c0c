//! Raw item operations

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};

use super::{format_timestamp, parse_timestamp, Database};
use crate::error::Result;
use crate::models::{RawItem, RawItemStats, RawItemStatus, SenderCount, StoredRawItem};

/// Result of saving a raw item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawItemInsert {
    /// New raw item, contains its ID
    Inserted(i64),
    /// Same fingerprint already stored for this owner, contains the existing ID
    Existing(i64),
}

impl RawItemInsert {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Existing(id) => *id,
        }
    }
}

const RAW_ITEM_COLUMNS: &str = "id, owner_id, source_kind, raw_text, structured_fields, sender, \
     received_at, fingerprint, status, status_reason, transaction_id, created_at, updated_at";

impl Database {
    /// Save a raw item, keyed on (owner, fingerprint)
    pub fn save_raw_item(&self, item: &RawItem) -> Result<RawItemInsert> {
        let conn = self.conn()?;

        let structured = item
            .structured_fields
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO raw_items (owner_id, source_kind, raw_text, structured_fields, sender, received_at, fingerprint)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, fingerprint) DO NOTHING
            "#,
            params![
                item.owner_id,
                item.source_kind.as_str(),
                item.raw_text,
                structured,
                item.sender,
                format_timestamp(&item.received_at),
                item.fingerprint,
            ],
        )?;

        if inserted > 0 {
            return Ok(RawItemInsert::Inserted(conn.last_insert_rowid()));
        }

        let id: i64 = conn.query_row(
            "SELECT id FROM raw_items WHERE owner_id = ? AND fingerprint = ?",
            params![item.owner_id, item.fingerprint],
            |row| row.get(0),
        )?;
        Ok(RawItemInsert::Existing(id))
    }

    /// Get a raw item by ID, scoped to its owner
    pub fn get_raw_item(&self, owner_id: &str, id: i64) -> Result<Option<StoredRawItem>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM raw_items WHERE owner_id = ? AND id = ?",
            RAW_ITEM_COLUMNS
        );
        let item = conn
            .query_row(&sql, params![owner_id, id], Self::row_to_raw_item)
            .optional()?;
        Ok(item)
    }

    /// List raw items newest first, optionally by status
    pub fn list_raw_items(
        &self,
        owner_id: &str,
        status: Option<RawItemStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredRawItem>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM raw_items
             WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY received_at DESC, id DESC
             LIMIT ?3 OFFSET ?4",
            RAW_ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![owner_id, status.map(|s| s.as_str()), limit, offset],
                Self::row_to_raw_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Raw items not resolved definitively (pending, fallback, failed), oldest first
    pub fn list_unparsed_raw_items(&self, owner_id: &str) -> Result<Vec<StoredRawItem>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM raw_items WHERE owner_id = ? AND status != 'parsed' ORDER BY id",
            RAW_ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![owner_id], Self::row_to_raw_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Record the processing outcome of a raw item
    pub fn set_raw_item_status(
        &self,
        id: i64,
        status: RawItemStatus,
        reason: Option<&str>,
        transaction_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE raw_items
            SET status = ?, status_reason = ?, transaction_id = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![status.as_str(), reason, transaction_id, id],
        )?;
        Ok(())
    }

    /// Delete a raw item; its transaction (if any) survives without a source
    pub fn delete_raw_item(&self, owner_id: &str, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE transactions SET source_id = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE owner_id = ? AND source_id = ?",
            params![owner_id, id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM raw_items WHERE owner_id = ? AND id = ?",
            params![owner_id, id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Parsing statistics and top senders for an owner
    pub fn raw_item_stats(&self, owner_id: &str) -> Result<RawItemStats> {
        let conn = self.conn()?;

        let (total, parsed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'parsed' THEN 1 ELSE 0 END), 0)
             FROM raw_items WHERE owner_id = ?",
            params![owner_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT sender, COUNT(*) AS n FROM raw_items
            WHERE owner_id = ? AND sender IS NOT NULL
            GROUP BY sender
            ORDER BY n DESC, sender ASC
            LIMIT 5
            "#,
        )?;
        let top_senders = stmt
            .query_map(params![owner_id], |row| {
                Ok(SenderCount {
                    sender: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let parsing_rate = if total > 0 {
            (parsed as f64 / total as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(RawItemStats {
            total,
            parsed,
            unparsed: total - parsed,
            parsing_rate,
            top_senders,
        })
    }

    fn row_to_raw_item(row: &rusqlite::Row) -> rusqlite::Result<StoredRawItem> {
        let kind_str: String = row.get(2)?;
        let structured_str: Option<String> = row.get(4)?;
        let received_str: String = row.get(6)?;
        let status_str: String = row.get(8)?;
        let created_str: String = row.get(11)?;
        let updated_str: String = row.get(12)?;

        let structured_fields: Option<BTreeMap<String, String>> =
            structured_str.and_then(|s| serde_json::from_str(&s).ok());

        Ok(StoredRawItem {
            id: row.get(0)?,
            item: RawItem {
                source_kind: kind_str.parse().unwrap_or_default(),
                raw_text: row.get(3)?,
                structured_fields,
                received_at: parse_timestamp(&received_str),
                owner_id: row.get(1)?,
                sender: row.get(5)?,
                fingerprint: row.get(7)?,
            },
            status: status_str.parse().unwrap_or_default(),
            status_reason: row.get(9)?,
            transaction_id: row.get(10)?,
            created_at: parse_timestamp(&created_str),
            updated_at: parse_timestamp(&updated_str),
        })
    }
}
