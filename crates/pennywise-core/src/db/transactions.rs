//! Transaction operations

use std::collections::BTreeSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};

use super::transaction_filter::TransactionFilter;
use super::{format_timestamp, minute_key, parse_timestamp, Database};
use crate::error::{Error, Result};
use crate::models::{EditableField, ExtractionMethod, Transaction, TransactionEdit};

const TRANSACTION_COLUMNS: &str = "t.id, t.owner_id, t.source_id, t.ts, t.amount, t.direction, \
     t.merchant, t.category, t.payment_mode, t.reference_number, t.account_hint, t.bank_hint, \
     t.remarks, t.failed, t.recurring_group_id, t.confidence, t.extraction_method, \
     t.classification_reason, t.user_edited, t.created_at, t.updated_at";

/// Canonical storage form of an amount
pub(crate) fn format_amount(amount: &Decimal) -> String {
    format!("{:.2}", amount)
}

fn encode_user_edited(fields: &BTreeSet<EditableField>) -> Result<String> {
    Ok(serde_json::to_string(fields)?)
}

impl Database {
    /// Insert or update a transaction
    ///
    /// Rows with a source are keyed on (owner, source): a second write for the
    /// same raw item updates the existing row in place. Manual rows (no
    /// source) with `id == 0` are always inserted; with a non-zero `id` the
    /// matching row is updated.
    pub fn upsert_transaction(&self, tx: &Transaction) -> Result<Transaction> {
        let conn = self.conn()?;
        let user_edited = encode_user_edited(&tx.user_edited)?;
        let amount = format_amount(&tx.amount);

        let id = if tx.source_id.is_none() && tx.id != 0 {
            let updated = conn.execute(
                r#"
                UPDATE transactions SET
                    ts = ?, ts_minute = ?, amount = ?, direction = ?, merchant = ?, category = ?,
                    payment_mode = ?, reference_number = ?, account_hint = ?, bank_hint = ?,
                    remarks = ?, failed = ?, recurring_group_id = ?, confidence = ?,
                    extraction_method = ?, classification_reason = ?, user_edited = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ? AND owner_id = ?
                "#,
                params![
                    format_timestamp(&tx.ts),
                    minute_key(&tx.ts),
                    amount,
                    tx.direction.as_str(),
                    tx.merchant,
                    tx.category,
                    tx.payment_mode,
                    tx.reference_number,
                    tx.account_hint,
                    tx.bank_hint,
                    tx.remarks,
                    tx.failed,
                    tx.recurring_group_id,
                    tx.confidence,
                    tx.extraction_method.as_str(),
                    tx.classification_reason,
                    user_edited,
                    tx.id,
                    tx.owner_id,
                ],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("transaction {}", tx.id)));
            }
            tx.id
        } else {
            conn.execute(
                r#"
                INSERT INTO transactions (
                    owner_id, source_id, ts, ts_minute, amount, direction, merchant, category,
                    payment_mode, reference_number, account_hint, bank_hint, remarks, failed,
                    recurring_group_id, confidence, extraction_method, classification_reason, user_edited
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(owner_id, source_id) DO UPDATE SET
                    ts = excluded.ts,
                    ts_minute = excluded.ts_minute,
                    amount = excluded.amount,
                    direction = excluded.direction,
                    merchant = excluded.merchant,
                    category = excluded.category,
                    payment_mode = excluded.payment_mode,
                    reference_number = excluded.reference_number,
                    account_hint = excluded.account_hint,
                    bank_hint = excluded.bank_hint,
                    remarks = excluded.remarks,
                    failed = excluded.failed,
                    recurring_group_id = excluded.recurring_group_id,
                    confidence = excluded.confidence,
                    extraction_method = excluded.extraction_method,
                    classification_reason = excluded.classification_reason,
                    user_edited = excluded.user_edited,
                    updated_at = CURRENT_TIMESTAMP
                "#,
                params![
                    tx.owner_id,
                    tx.source_id,
                    format_timestamp(&tx.ts),
                    minute_key(&tx.ts),
                    amount,
                    tx.direction.as_str(),
                    tx.merchant,
                    tx.category,
                    tx.payment_mode,
                    tx.reference_number,
                    tx.account_hint,
                    tx.bank_hint,
                    tx.remarks,
                    tx.failed,
                    tx.recurring_group_id,
                    tx.confidence,
                    tx.extraction_method.as_str(),
                    tx.classification_reason,
                    user_edited,
                ],
            )?;

            match tx.source_id {
                Some(source_id) => conn.query_row(
                    "SELECT id FROM transactions WHERE owner_id = ? AND source_id = ?",
                    params![tx.owner_id, source_id],
                    |row| row.get(0),
                )?,
                None => conn.last_insert_rowid(),
            }
        };

        drop(conn);
        self.get_transaction(&tx.owner_id, id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))
    }

    /// Get a single transaction by ID, scoped to its owner
    pub fn get_transaction(&self, owner_id: &str, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions t WHERE t.owner_id = ? AND t.id = ?",
            TRANSACTION_COLUMNS
        );
        let tx = conn
            .query_row(&sql, params![owner_id, id], Self::row_to_transaction)
            .optional()?;
        Ok(tx)
    }

    /// Transaction produced from a given raw item, if any
    pub fn get_by_source_id(&self, owner_id: &str, source_id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions t WHERE t.owner_id = ? AND t.source_id = ?",
            TRANSACTION_COLUMNS
        );
        let tx = conn
            .query_row(&sql, params![owner_id, source_id], Self::row_to_transaction)
            .optional()?;
        Ok(tx)
    }

    /// List an owner's transactions
    pub fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let built = filter.build(owner_id);
        let sql = format!(
            "SELECT {} FROM transactions t {} {} {}",
            TRANSACTION_COLUMNS, built.where_clause, built.order_clause, built.limit_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs = built.params_refs();
        let transactions = stmt
            .query_map(params_refs.as_slice(), Self::row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transactions)
    }

    /// Count an owner's transactions matching a filter (ignores limit/offset)
    pub fn count_by_owner(&self, owner_id: &str, filter: &TransactionFilter) -> Result<i64> {
        let conn = self.conn()?;
        let built = filter.build(owner_id);
        let mut stmt = conn.prepare(&built.build_count_query())?;
        let params_refs = built.params_refs();
        let count: i64 = stmt.query_row(params_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    /// Stored transaction matching the strict duplicate key
    ///
    /// Key: amount, timestamp minute and reference number. The transaction
    /// sourced from `exclude_source` (the item being reconciled) never matches.
    pub fn find_duplicate(
        &self,
        owner_id: &str,
        amount: &Decimal,
        ts_minute: &str,
        reference_number: &str,
        exclude_source: Option<i64>,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions t
             WHERE t.owner_id = ?1 AND t.amount = ?2 AND t.ts_minute = ?3
               AND t.reference_number = ?4 COLLATE NOCASE
               AND (?5 IS NULL OR t.source_id IS NULL OR t.source_id != ?5)
             ORDER BY t.id LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let tx = conn
            .query_row(
                &sql,
                params![owner_id, format_amount(amount), ts_minute, reference_number, exclude_source],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Stored transaction matching the loose key (no reference on either side)
    pub fn find_loose_duplicate(
        &self,
        owner_id: &str,
        amount: &Decimal,
        ts_minute: &str,
        merchant: &str,
        exclude_source: Option<i64>,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions t
             WHERE t.owner_id = ?1 AND t.amount = ?2 AND t.ts_minute = ?3
               AND t.reference_number IS NULL
               AND lower(trim(t.merchant)) = lower(trim(?4))
               AND (?5 IS NULL OR t.source_id IS NULL OR t.source_id != ?5)
             ORDER BY t.id LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let tx = conn
            .query_row(
                &sql,
                params![owner_id, format_amount(amount), ts_minute, merchant, exclude_source],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Apply a user edit; every touched field becomes user-owned
    pub fn apply_user_edit(
        &self,
        owner_id: &str,
        id: i64,
        edit: &TransactionEdit,
    ) -> Result<Transaction> {
        let mut tx = self
            .get_transaction(owner_id, id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;
        if edit.is_empty() {
            return Ok(tx);
        }

        if let Some(ref category) = edit.category {
            let category = category.trim().to_lowercase();
            if category.is_empty() {
                return Err(Error::InvalidData("category cannot be empty".into()));
            }
            tx.category = category;
        }
        if let Some(ref merchant) = edit.merchant {
            tx.merchant = Some(merchant.trim().to_string()).filter(|m| !m.is_empty());
        }
        if let Some(ref remarks) = edit.remarks {
            tx.remarks = Some(remarks.trim().to_string()).filter(|r| !r.is_empty());
        }
        if let Some(failed) = edit.failed {
            tx.failed = failed;
        }
        tx.user_edited.extend(edit.touched_fields());

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE transactions
            SET category = ?, merchant = ?, remarks = ?, failed = ?, user_edited = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND owner_id = ?
            "#,
            params![
                tx.category,
                tx.merchant,
                tx.remarks,
                tx.failed,
                encode_user_edited(&tx.user_edited)?,
                id,
                owner_id,
            ],
        )?;
        drop(conn);

        self.get_transaction(owner_id, id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))
    }

    /// Delete a transaction and unlink its raw item
    ///
    /// The raw item keeps its status; recurring group ids of siblings are untouched.
    pub fn delete_transaction(&self, owner_id: &str, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        db_tx.execute(
            "UPDATE raw_items SET transaction_id = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE owner_id = ? AND transaction_id = ?",
            params![owner_id, id],
        )?;
        let deleted = db_tx.execute(
            "DELETE FROM transactions WHERE owner_id = ? AND id = ?",
            params![owner_id, id],
        )?;
        db_tx.commit()?;
        Ok(deleted > 0)
    }

    /// Set an automatically derived category
    pub fn set_category(&self, id: i64, category: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET category = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![category, id],
        )?;
        Ok(())
    }

    /// Assign a recurring group to a set of transactions
    pub fn set_recurring_group(&self, ids: &[i64], group_id: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = db_tx.prepare(
                "UPDATE transactions SET recurring_group_id = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ? AND (recurring_group_id IS NULL OR recurring_group_id != ?)",
            )?;
            for id in ids {
                updated += stmt.execute(params![group_id, id, group_id])?;
            }
        }
        db_tx.commit()?;
        Ok(updated)
    }

    /// Helper to convert a row to Transaction
    /// Column order follows `TRANSACTION_COLUMNS`
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let ts_str: String = row.get(3)?;
        let amount_str: String = row.get(4)?;
        let direction_str: String = row.get(5)?;
        let method_str: String = row.get(16)?;
        let user_edited_str: String = row.get(18)?;
        let created_at_str: String = row.get(19)?;
        let updated_at_str: String = row.get(20)?;

        Ok(Transaction {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            source_id: row.get(2)?,
            ts: parse_timestamp(&ts_str),
            amount: Decimal::from_str(&amount_str).unwrap_or_default(),
            direction: direction_str.parse().unwrap_or_default(),
            merchant: row.get(6)?,
            category: row.get(7)?,
            payment_mode: row.get(8)?,
            reference_number: row.get(9)?,
            account_hint: row.get(10)?,
            bank_hint: row.get(11)?,
            remarks: row.get(12)?,
            failed: row.get(13)?,
            recurring_group_id: row.get(14)?,
            confidence: row.get(15)?,
            extraction_method: method_str.parse().unwrap_or(ExtractionMethod::Fallback),
            classification_reason: row.get(17)?,
            user_edited: serde_json::from_str(&user_edited_str).unwrap_or_default(),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}
