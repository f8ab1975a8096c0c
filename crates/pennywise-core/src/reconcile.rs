//! Reconciliation: extracted records to canonical transactions
//!
//! One raw item maps to at most one transaction. Re-extraction of the same
//! item updates its transaction in place, leaving user-owned fields alone.
//! Distinct items that extract to the same (amount, minute, reference) are
//! collapsed into the first one stored.

use chrono::Utc;
use tracing::debug;

use crate::categorize::CategoryTable;
use crate::config::ReconcileConfig;
use crate::db::{minute_key, Database};
use crate::error::{Error, Result};
use crate::extract::amount_in_range;
use crate::models::{
    EditableField, ExtractedTransaction, ExtractionMethod, ManualTransaction, Transaction,
};

/// What reconciliation did with an extracted record
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Created(Transaction),
    /// The item's existing transaction was refreshed
    Updated(Transaction),
    /// Another stored transaction already represents this record
    DuplicateSkipped { existing_id: i64 },
}

impl ReconcileOutcome {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Self::Created(tx) | Self::Updated(tx) => Some(tx),
            Self::DuplicateSkipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    categories: CategoryTable,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(categories: CategoryTable, config: ReconcileConfig) -> Self {
        Self { categories, config }
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Reconcile one extracted record sourced from a stored raw item
    ///
    /// Callers serialize calls per owner; the storage constraint on
    /// (owner, source) backs this up.
    pub fn reconcile(
        &self,
        db: &Database,
        owner_id: &str,
        source_id: i64,
        extracted: &ExtractedTransaction,
        classification_reason: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let existing = db.get_by_source_id(owner_id, source_id)?;

        if existing.is_none() {
            if let Some(duplicate) = self.find_duplicate(db, owner_id, source_id, extracted)? {
                debug!(
                    owner = owner_id,
                    raw_id = source_id,
                    existing_id = duplicate.id,
                    "Duplicate transaction skipped"
                );
                return Ok(ReconcileOutcome::DuplicateSkipped {
                    existing_id: duplicate.id,
                });
            }
        }

        let tx = self.build_transaction(
            owner_id,
            Some(source_id),
            extracted,
            classification_reason,
            existing.as_ref(),
        );
        let stored = db.upsert_transaction(&tx)?;

        Ok(match existing {
            Some(_) => ReconcileOutcome::Updated(stored),
            None => ReconcileOutcome::Created(stored),
        })
    }

    fn find_duplicate(
        &self,
        db: &Database,
        owner_id: &str,
        source_id: i64,
        extracted: &ExtractedTransaction,
    ) -> Result<Option<Transaction>> {
        let ts = extracted.occurred_at.unwrap_or_else(Utc::now);
        let minute = minute_key(&ts);

        match extracted.reference_number.as_deref() {
            Some(reference) => db.find_duplicate(
                owner_id,
                &extracted.amount,
                &minute,
                reference,
                Some(source_id),
            ),
            None if self.config.loose_duplicate_match => match extracted.merchant.as_deref() {
                Some(merchant) => db.find_loose_duplicate(
                    owner_id,
                    &extracted.amount,
                    &minute,
                    merchant,
                    Some(source_id),
                ),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Canonical transaction for an extracted record
    ///
    /// With `existing`, its identity, recurring group and user-edited fields
    /// carry over; everything else comes from the new extraction.
    pub fn build_transaction(
        &self,
        owner_id: &str,
        source_id: Option<i64>,
        extracted: &ExtractedTransaction,
        classification_reason: Option<&str>,
        existing: Option<&Transaction>,
    ) -> Transaction {
        let now = Utc::now();
        let mut tx = Transaction {
            id: existing.map(|e| e.id).unwrap_or(0),
            owner_id: owner_id.to_string(),
            source_id,
            ts: extracted.occurred_at.unwrap_or(now),
            amount: extracted.amount.round_dp(2),
            direction: extracted.direction,
            merchant: extracted.merchant.clone(),
            category: String::new(),
            payment_mode: extracted.payment_mode.clone(),
            reference_number: extracted.reference_number.clone(),
            account_hint: extracted.account_hint.clone(),
            bank_hint: extracted.bank_hint.clone(),
            remarks: extracted.remarks.clone(),
            failed: extracted.failed,
            recurring_group_id: existing.and_then(|e| e.recurring_group_id.clone()),
            confidence: extracted.confidence,
            extraction_method: extracted.extraction_method,
            classification_reason: classification_reason.map(str::to_string),
            user_edited: existing.map(|e| e.user_edited.clone()).unwrap_or_default(),
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };

        if let Some(prev) = existing {
            for field in prev.user_edited.iter() {
                match field {
                    EditableField::Category => tx.category = prev.category.clone(),
                    EditableField::Merchant => tx.merchant = prev.merchant.clone(),
                    EditableField::Remarks => tx.remarks = prev.remarks.clone(),
                    EditableField::Failed => tx.failed = prev.failed,
                }
            }
        }

        if !tx.is_user_edited(EditableField::Category) {
            tx.category = match extracted.category_hint.as_deref().map(str::trim) {
                Some(hint) if !hint.is_empty() => hint.to_lowercase(),
                _ => self
                    .categories
                    .categorize(tx.merchant.as_deref(), tx.remarks.as_deref()),
            };
        }

        tx
    }

    /// Store a user-entered transaction
    pub fn add_manual(
        &self,
        db: &Database,
        owner_id: &str,
        input: &ManualTransaction,
    ) -> Result<Transaction> {
        if input.amount.is_sign_negative() {
            return Err(Error::InvalidData("amount must be non-negative".into()));
        }
        if !amount_in_range(input.amount) {
            return Err(Error::InvalidData("amount exceeds the supported range".into()));
        }

        let now = Utc::now();
        let merchant = input
            .merchant
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let remarks = input
            .remarks
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let mut user_edited = std::collections::BTreeSet::new();
        let category = match input.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => {
                user_edited.insert(EditableField::Category);
                category.to_lowercase()
            }
            _ => self
                .categories
                .categorize(merchant.as_deref(), remarks.as_deref()),
        };

        let tx = Transaction {
            id: 0,
            owner_id: owner_id.to_string(),
            source_id: None,
            ts: input.ts,
            amount: input.amount.round_dp(2),
            direction: input.direction,
            merchant,
            category,
            payment_mode: input.payment_mode.clone(),
            reference_number: input.reference_number.clone(),
            account_hint: input.account_hint.clone(),
            bank_hint: None,
            remarks,
            failed: input.failed,
            recurring_group_id: None,
            confidence: 1.0,
            extraction_method: ExtractionMethod::Manual,
            classification_reason: None,
            user_edited,
            created_at: now,
            updated_at: now,
        };

        db.upsert_transaction(&tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, RawItem, SourceKind, TransactionEdit, UNCATEGORIZED};
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn extracted(amount: i64, merchant: &str, reference: Option<&str>) -> ExtractedTransaction {
        ExtractedTransaction {
            amount: Decimal::new(amount * 100, 2),
            direction: Direction::Debit,
            merchant: Some(merchant.to_string()),
            occurred_at: Some(Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 12).unwrap()),
            reference_number: reference.map(str::to_string),
            account_hint: None,
            payment_mode: Some("upi".to_string()),
            bank_hint: None,
            remarks: None,
            category_hint: None,
            failed: false,
            confidence: 0.9,
            extraction_method: ExtractionMethod::Ai,
        }
    }

    fn raw_id(db: &Database, fingerprint: &str) -> i64 {
        let item = RawItem {
            source_kind: SourceKind::Sms,
            raw_text: fingerprint.to_string(),
            structured_fields: None,
            received_at: Utc::now(),
            owner_id: "alice".to_string(),
            sender: None,
            fingerprint: fingerprint.to_string(),
        };
        db.save_raw_item(&item).unwrap().id()
    }

    #[test]
    fn test_build_assigns_category() {
        let reconciler = Reconciler::default();
        let tx = reconciler.build_transaction(
            "alice",
            Some(1),
            &extracted(199, "NETFLIX", None),
            Some("debit alert"),
            None,
        );
        assert_eq!(tx.category, "entertainment");
        assert_eq!(tx.id, 0);
        assert_eq!(tx.classification_reason.as_deref(), Some("debit alert"));

        let tx = reconciler.build_transaction(
            "alice",
            Some(1),
            &extracted(5, "ACME LLC", None),
            None,
            None,
        );
        assert_eq!(tx.category, UNCATEGORIZED);
    }

    #[test]
    fn test_category_hint_wins_over_keywords() {
        let reconciler = Reconciler::default();
        let mut row = extracted(500, "Amazon Purchase", None);
        row.category_hint = Some("Gifts".to_string());
        let tx = reconciler.build_transaction("alice", Some(1), &row, None, None);
        assert_eq!(tx.category, "gifts");
    }

    #[test]
    fn test_reconcile_updates_in_place() {
        let db = Database::in_memory().unwrap();
        let reconciler = Reconciler::default();
        let source = raw_id(&db, "a");

        let first = reconciler
            .reconcile(&db, "alice", source, &extracted(100, "Swiggy", None), None)
            .unwrap();
        let first = match first {
            ReconcileOutcome::Created(tx) => tx,
            other => panic!("expected Created, got {:?}", other),
        };

        let again = reconciler
            .reconcile(&db, "alice", source, &extracted(120, "Swiggy", None), None)
            .unwrap();
        match again {
            ReconcileOutcome::Updated(tx) => {
                assert_eq!(tx.id, first.id);
                assert_eq!(tx.amount, Decimal::new(12000, 2));
            }
            other => panic!("expected Updated, got {:?}", other),
        }
    }

    #[test]
    fn test_user_edits_survive_reconcile() {
        let db = Database::in_memory().unwrap();
        let reconciler = Reconciler::default();
        let source = raw_id(&db, "a");

        let tx = reconciler
            .reconcile(&db, "alice", source, &extracted(100, "Swiggy", None), None)
            .unwrap()
            .transaction()
            .cloned()
            .unwrap();
        let edit = TransactionEdit {
            category: Some("treats".to_string()),
            remarks: Some("friday".to_string()),
            ..Default::default()
        };
        db.apply_user_edit("alice", tx.id, &edit).unwrap();

        let refreshed = reconciler
            .reconcile(&db, "alice", source, &extracted(110, "Swiggy Instamart", None), None)
            .unwrap()
            .transaction()
            .cloned()
            .unwrap();
        assert_eq!(refreshed.category, "treats");
        assert_eq!(refreshed.remarks.as_deref(), Some("friday"));
        assert_eq!(refreshed.merchant.as_deref(), Some("Swiggy Instamart"));
        assert_eq!(refreshed.amount, Decimal::new(11000, 2));
    }

    #[test]
    fn test_duplicate_requires_reference() {
        let db = Database::in_memory().unwrap();
        let reconciler = Reconciler::default();
        let (a, b, c, d) = (raw_id(&db, "a"), raw_id(&db, "b"), raw_id(&db, "c"), raw_id(&db, "d"));

        reconciler
            .reconcile(&db, "alice", a, &extracted(500, "Amazon", Some("REF123456")), None)
            .unwrap();
        let dup = reconciler
            .reconcile(&db, "alice", b, &extracted(500, "Amazon", Some("REF123456")), None)
            .unwrap();
        assert!(matches!(dup, ReconcileOutcome::DuplicateSkipped { .. }));

        // Without a reference both are kept
        reconciler
            .reconcile(&db, "alice", c, &extracted(75, "Cafe", None), None)
            .unwrap();
        let distinct = reconciler
            .reconcile(&db, "alice", d, &extracted(75, "Cafe", None), None)
            .unwrap();
        assert!(matches!(distinct, ReconcileOutcome::Created(_)));
    }

    #[test]
    fn test_loose_duplicate_policy() {
        let db = Database::in_memory().unwrap();
        let reconciler = Reconciler::new(
            CategoryTable::default(),
            ReconcileConfig {
                loose_duplicate_match: true,
            },
        );
        let (a, b) = (raw_id(&db, "a"), raw_id(&db, "b"));

        reconciler
            .reconcile(&db, "alice", a, &extracted(75, "Cafe", None), None)
            .unwrap();
        let dup = reconciler
            .reconcile(&db, "alice", b, &extracted(75, "CAFE", None), None)
            .unwrap();
        assert!(matches!(dup, ReconcileOutcome::DuplicateSkipped { .. }));
    }

    #[test]
    fn test_add_manual() {
        let db = Database::in_memory().unwrap();
        let reconciler = Reconciler::default();
        let input = ManualTransaction {
            ts: Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap(),
            amount: Decimal::new(4500, 2),
            direction: Direction::Debit,
            merchant: Some("Uber".to_string()),
            category: None,
            payment_mode: Some("cash".to_string()),
            reference_number: None,
            account_hint: None,
            remarks: None,
            failed: false,
        };

        let tx = reconciler.add_manual(&db, "alice", &input).unwrap();
        assert_eq!(tx.extraction_method, ExtractionMethod::Manual);
        assert_eq!(tx.source_id, None);
        assert_eq!(tx.category, "transport");
        assert!(tx.user_edited.is_empty());

        let with_category = ManualTransaction {
            category: Some("Work".to_string()),
            ..input.clone()
        };
        let tx = reconciler.add_manual(&db, "alice", &with_category).unwrap();
        assert_eq!(tx.category, "work");
        assert!(tx.is_user_edited(EditableField::Category));

        let negative = ManualTransaction {
            amount: Decimal::new(-100, 2),
            ..input.clone()
        };
        assert!(reconciler.add_manual(&db, "alice", &negative).is_err());

        let huge = ManualTransaction {
            amount: Decimal::from_str_exact("50000000000000000000000000000").unwrap(),
            ..input
        };
        assert!(matches!(
            reconciler.add_manual(&db, "alice", &huge),
            Err(Error::InvalidData(_))
        ));
    }
}
