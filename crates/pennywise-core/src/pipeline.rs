//! Pipeline orchestration
//!
//! Sequences adapter, classifier, extractor, reconciler and storage for the
//! single-SMS path and the batch (backup file / reprocessing) path.
//!
//! Batch items are extracted concurrently on a bounded worker pool;
//! reconciliation runs under a per-owner lock so two items can never race
//! to create the same transaction. Per-item problems never fail a batch:
//! they come back in the report, sorted by input index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapter::{self, AdapterParseError};
use crate::ai::AIClient;
use crate::categorize::CategoryTable;
use crate::classify::{CallMode, Classifier};
use crate::config::{EngineConfig, PipelineConfig};
use crate::db::{Database, RawItemInsert};
use crate::enrich::Enricher;
use crate::error::{Error, Result};
use crate::extract::{extract_item, ItemExtraction};
use crate::models::{
    BackupValidation, BatchReport, EnrichmentReport, FileKind, ItemFailure, ManualTransaction,
    RawItem, RawItemStatus, SmsInput, SmsOutcome, StoredRawItem, Transaction, TransactionEdit,
};
use crate::reconcile::{ReconcileOutcome, Reconciler};

/// Reason given when a payload was already turned into a transaction
pub const ALREADY_INGESTED: &str = "duplicate: already ingested";

/// Cooperative cancellation for batch imports
///
/// Items already stored stay stored; workers check the token before
/// extraction and before reconciliation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What happened to one raw item
#[derive(Debug, Clone)]
enum ItemResult {
    Stored(Transaction),
    Duplicate { existing_id: i64 },
    NotTransactional(String),
    Failed(String),
    Cancelled,
}

struct PipelineInner {
    db: Database,
    classifier: Classifier,
    reconciler: Reconciler,
    enricher: Enricher,
    config: PipelineConfig,
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// The extraction and normalization engine
///
/// Cheap to clone; clones share storage, AI client and owner locks.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(db: Database, ai: Option<AIClient>, config: EngineConfig) -> Self {
        let categories = CategoryTable::with_extra(&config.extra_categories);
        Self {
            inner: Arc::new(PipelineInner {
                db,
                classifier: Classifier::new(ai, config.ai),
                reconciler: Reconciler::new(categories.clone(), config.reconcile),
                enricher: Enricher::new(categories, config.recurring),
                config: config.pipeline,
                owner_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Pipeline without an AI service: every item takes the fallback path
    pub fn offline(db: Database) -> Self {
        Self::new(db, None, EngineConfig::default())
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn classifier(&self) -> &Classifier {
        &self.inner.classifier
    }

    pub fn categories(&self) -> &CategoryTable {
        self.inner.reconciler.categories()
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.owner_locks.lock().await;
        locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run a storage operation, retrying storage failures
    fn with_storage_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let retries = self.inner.config.storage_retries;
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_storage() && attempt < retries => {
                    attempt += 1;
                    warn!(operation = what, attempt, error = %e, "Storage write failed, retrying");
                }
                result => return result,
            }
        }
    }

    /// Record an item's processing state; failures here are logged, not raised
    fn mark(
        &self,
        raw_id: i64,
        status: RawItemStatus,
        reason: Option<&str>,
        transaction_id: Option<i64>,
    ) {
        let result = self.with_storage_retry("set_raw_item_status", || {
            self.db()
                .set_raw_item_status(raw_id, status, reason, transaction_id)
        });
        if let Err(e) = result {
            warn!(raw_id, error = %e, "Failed to record raw item status");
        }
    }

    /// Transaction currently linked to a raw item, if any
    fn linked_transaction(&self, owner_id: &str, raw_id: i64) -> Option<i64> {
        match self.db().get_by_source_id(owner_id, raw_id) {
            Ok(tx) => tx.map(|t| t.id),
            Err(e) => {
                warn!(raw_id, error = %e, "Failed to look up linked transaction");
                None
            }
        }
    }

    /// Classify, extract and reconcile one stored raw item
    async fn process_item(
        &self,
        owner_id: &str,
        raw_id: i64,
        item: &RawItem,
        mode: CallMode,
        cancel: Option<&CancelToken>,
    ) -> ItemResult {
        let is_cancelled = || cancel.is_some_and(|c| c.is_cancelled());
        if is_cancelled() {
            return ItemResult::Cancelled;
        }

        let extraction = extract_item(&self.inner.classifier, item, mode).await;

        if is_cancelled() {
            return ItemResult::Cancelled;
        }

        match extraction {
            ItemExtraction::NotTransactional(outcome) => {
                let status = if outcome.from_ai() {
                    RawItemStatus::Parsed
                } else {
                    RawItemStatus::Fallback
                };
                let reason = outcome.result.reason;
                debug!(owner = owner_id, raw_id, %reason, "Not a transaction");
                let linked = self.linked_transaction(owner_id, raw_id);
                self.mark(raw_id, status, Some(&reason), linked);
                ItemResult::NotTransactional(reason)
            }
            ItemExtraction::Failed(failure) => {
                debug!(owner = owner_id, raw_id, reason = %failure, "Extraction failed");
                let linked = self.linked_transaction(owner_id, raw_id);
                self.mark(raw_id, RawItemStatus::Failed, Some(&failure.reason), linked);
                ItemResult::Failed(failure.reason)
            }
            ItemExtraction::Extracted {
                transaction,
                classification,
            } => {
                let status = if !item.is_free_text()
                    || transaction.extraction_method == crate::models::ExtractionMethod::Ai
                {
                    RawItemStatus::Parsed
                } else {
                    RawItemStatus::Fallback
                };
                let reason = classification.as_ref().map(|c| c.reason.as_str());

                let lock = self.owner_lock(owner_id).await;
                let _guard = lock.lock().await;

                let outcome = self.with_storage_retry("reconcile", || {
                    self.inner
                        .reconciler
                        .reconcile(self.db(), owner_id, raw_id, &transaction, reason)
                });

                match outcome {
                    Ok(ReconcileOutcome::Created(tx)) | Ok(ReconcileOutcome::Updated(tx)) => {
                        self.mark(raw_id, status, None, Some(tx.id));
                        ItemResult::Stored(tx)
                    }
                    Ok(ReconcileOutcome::DuplicateSkipped { existing_id }) => {
                        let reason = format!("duplicate of transaction {}", existing_id);
                        self.mark(raw_id, status, Some(&reason), None);
                        ItemResult::Duplicate { existing_id }
                    }
                    Err(e) => {
                        error!(owner = owner_id, raw_id, error = %e, "Failed to store transaction");
                        let reason = format!("storage error: {}", e);
                        self.mark(raw_id, RawItemStatus::Failed, Some(&reason), None);
                        ItemResult::Failed(reason)
                    }
                }
            }
        }
    }

    /// Ingest one SMS
    ///
    /// "Not a transaction" and duplicates are normal outcomes, not errors.
    /// Re-ingesting a payload returns what was recorded the first time.
    pub async fn ingest_sms(&self, owner_id: &str, input: &SmsInput) -> Result<SmsOutcome> {
        let item = adapter::normalize_sms(owner_id, input)?;
        let insert = self.with_storage_retry("save_raw_item", || self.db().save_raw_item(&item))?;
        let raw_id = insert.id();

        if let RawItemInsert::Existing(_) = insert {
            if let Some(stored) = self.db().get_raw_item(owner_id, raw_id)? {
                if let Some(outcome) = self.recorded_outcome(owner_id, &stored)? {
                    debug!(owner = owner_id, raw_id, "SMS already ingested");
                    return Ok(outcome);
                }
            }
        }

        let result = self
            .process_item(owner_id, raw_id, &item, CallMode::Interactive, None)
            .await;

        let outcome = match result {
            ItemResult::Stored(tx) => SmsOutcome {
                stored: true,
                transaction: Some(tx),
                skipped_reason: None,
                raw_item_id: Some(raw_id),
            },
            ItemResult::Duplicate { existing_id } => SmsOutcome {
                stored: false,
                transaction: self.db().get_transaction(owner_id, existing_id)?,
                skipped_reason: Some(format!("duplicate of transaction {}", existing_id)),
                raw_item_id: Some(raw_id),
            },
            ItemResult::NotTransactional(reason) | ItemResult::Failed(reason) => SmsOutcome {
                stored: false,
                transaction: None,
                skipped_reason: Some(reason),
                raw_item_id: Some(raw_id),
            },
            ItemResult::Cancelled => SmsOutcome {
                stored: false,
                transaction: None,
                skipped_reason: Some("cancelled".to_string()),
                raw_item_id: Some(raw_id),
            },
        };

        info!(
            owner = owner_id,
            raw_id,
            stored = outcome.stored,
            reason = outcome.skipped_reason.as_deref().unwrap_or(""),
            "SMS ingested"
        );
        Ok(outcome)
    }

    /// Outcome of a previous ingestion of the same payload; None when it never finished
    fn recorded_outcome(&self, owner_id: &str, stored: &StoredRawItem) -> Result<Option<SmsOutcome>> {
        if stored.status == RawItemStatus::Pending {
            return Ok(None);
        }

        if let Some(tx_id) = stored.transaction_id {
            return Ok(Some(SmsOutcome {
                stored: false,
                transaction: self.db().get_transaction(owner_id, tx_id)?,
                skipped_reason: Some(ALREADY_INGESTED.to_string()),
                raw_item_id: Some(stored.id),
            }));
        }

        Ok(Some(SmsOutcome {
            stored: false,
            transaction: None,
            skipped_reason: Some(
                stored
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| ALREADY_INGESTED.to_string()),
            ),
            raw_item_id: Some(stored.id),
        }))
    }

    /// Check a backup upload without importing it
    pub fn validate_backup(&self, kind: &str, content: &str) -> Result<BackupValidation> {
        adapter::validate_backup(kind, content)
    }

    /// Import a backup file
    pub async fn ingest_backup_file(
        &self,
        owner_id: &str,
        kind: FileKind,
        content: &str,
    ) -> Result<BatchReport> {
        self.ingest_backup_file_with_cancel(owner_id, kind, content, &CancelToken::new())
            .await
    }

    /// Import a backup file, stopping early when `cancel` fires
    pub async fn ingest_backup_file_with_cancel(
        &self,
        owner_id: &str,
        kind: FileKind,
        content: &str,
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        let items = adapter::normalize_file(owner_id, kind, content, Utc::now())?;

        let mut report = BatchReport::default();
        let mut work = Vec::with_capacity(items.len());
        let mut settled = Vec::new();

        for (index, result) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match result {
                Ok(item) => {
                    let insert = match self
                        .with_storage_retry("save_raw_item", || self.db().save_raw_item(&item))
                    {
                        Ok(insert) => insert,
                        Err(e) => {
                            report.processed += 1;
                            report.failures.push(ItemFailure {
                                index,
                                reason: format!("storage error: {}", e),
                            });
                            continue;
                        }
                    };

                    if let RawItemInsert::Existing(raw_id) = insert {
                        match self.with_storage_retry("get_raw_item", || {
                            self.prior_resolution(owner_id, raw_id)
                        }) {
                            Ok(Some(result)) => {
                                settled.push((index, result));
                                continue;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                report.processed += 1;
                                report.failures.push(ItemFailure {
                                    index,
                                    reason: format!("storage error: {}", e),
                                });
                                continue;
                            }
                        }
                    }
                    work.push((index, insert.id(), item));
                }
                Err(AdapterParseError { index, reason }) => {
                    report.processed += 1;
                    report.failures.push(ItemFailure { index, reason });
                }
            }
        }

        let mut results = self.run_batch(owner_id, work, cancel).await;
        results.append(&mut settled);
        tally(&mut report, results);
        report.cancelled |= cancel.is_cancelled();

        info!(
            owner = owner_id,
            kind = %kind,
            processed = report.processed,
            stored = report.stored,
            duplicates = report.duplicates,
            failed = report.failures.len(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Backup import complete"
        );
        Ok(report)
    }

    /// How a re-imported row was settled last time; None when it still needs work
    fn prior_resolution(&self, owner_id: &str, raw_id: i64) -> Result<Option<ItemResult>> {
        let Some(stored) = self.db().get_raw_item(owner_id, raw_id)? else {
            return Ok(None);
        };
        if !matches!(stored.status, RawItemStatus::Parsed | RawItemStatus::Fallback) {
            return Ok(None);
        }

        Ok(Some(match stored.transaction_id {
            Some(existing_id) => ItemResult::Duplicate { existing_id },
            None => ItemResult::NotTransactional(
                stored
                    .status_reason
                    .unwrap_or_else(|| ALREADY_INGESTED.to_string()),
            ),
        }))
    }

    /// Process items concurrently; results come back in completion order
    async fn run_batch(
        &self,
        owner_id: &str,
        work: Vec<(usize, i64, RawItem)>,
        cancel: &CancelToken,
    ) -> Vec<(usize, ItemResult)> {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut results = Vec::with_capacity(work.len());

        for (index, raw_id, item) in work {
            if cancel.is_cancelled() {
                results.push((index, ItemResult::Cancelled));
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Worker pool closed");
                    results.push((index, ItemResult::Failed("worker pool closed".into())));
                    continue;
                }
            };

            let pipeline = self.clone();
            let owner = owner_id.to_string();
            let token = cancel.clone();
            tasks.spawn(async move {
                let result = pipeline
                    .process_item(&owner, raw_id, &item, CallMode::Batch, Some(&token))
                    .await;
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = ?e, "Batch item task panicked"),
            }
        }
        results
    }

    /// Re-run classification, extraction and reconciliation over unparsed raw items
    pub async fn reprocess_unparsed(&self, owner_id: &str) -> Result<BatchReport> {
        let items = self.db().list_unparsed_raw_items(owner_id)?;
        let work = items
            .into_iter()
            .enumerate()
            .map(|(index, stored)| (index, stored.id, stored.item))
            .collect();

        let mut report = BatchReport::default();
        let results = self.run_batch(owner_id, work, &CancelToken::new()).await;
        tally(&mut report, results);

        info!(
            owner = owner_id,
            processed = report.processed,
            stored = report.stored,
            failed = report.failures.len(),
            "Reprocessing complete"
        );
        Ok(report)
    }

    /// Explicitly re-extract chosen raw items, whatever their status
    pub async fn reprocess_items(&self, owner_id: &str, raw_ids: &[i64]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut work = Vec::with_capacity(raw_ids.len());

        for (index, raw_id) in raw_ids.iter().enumerate() {
            let lookup =
                self.with_storage_retry("get_raw_item", || self.db().get_raw_item(owner_id, *raw_id));
            let reason = match lookup {
                Ok(Some(stored)) => {
                    work.push((index, stored.id, stored.item));
                    continue;
                }
                Ok(None) => format!("raw item {} not found", raw_id),
                Err(e) => format!("storage error: {}", e),
            };
            report.processed += 1;
            report.failures.push(ItemFailure { index, reason });
        }

        let results = self.run_batch(owner_id, work, &CancelToken::new()).await;
        tally(&mut report, results);
        Ok(report)
    }

    /// Recurring detection and category backfill for one owner
    pub async fn run_enrichment(&self, owner_id: &str) -> Result<EnrichmentReport> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        self.inner.enricher.run(self.db(), owner_id)
    }

    /// Store a user-entered transaction
    pub async fn add_manual_transaction(
        &self,
        owner_id: &str,
        input: &ManualTransaction,
    ) -> Result<Transaction> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        self.inner.reconciler.add_manual(self.db(), owner_id, input)
    }

    /// Apply a user edit to a stored transaction
    pub async fn edit_transaction(
        &self,
        owner_id: &str,
        id: i64,
        edit: &TransactionEdit,
    ) -> Result<Transaction> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        self.db().apply_user_edit(owner_id, id, edit)
    }

    /// Delete a transaction; NotFound when the owner has no such transaction
    pub async fn delete_transaction(&self, owner_id: &str, id: i64) -> Result<()> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        if self.db().delete_transaction(owner_id, id)? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("transaction {}", id)))
        }
    }
}

/// Fold item results into a report; failures end up sorted by index
fn tally(report: &mut BatchReport, results: Vec<(usize, ItemResult)>) {
    for (index, result) in results {
        match result {
            ItemResult::Stored(_) => {
                report.processed += 1;
                report.stored += 1;
            }
            ItemResult::Duplicate { .. } => {
                report.processed += 1;
                report.duplicates += 1;
            }
            ItemResult::NotTransactional(_) => {
                report.processed += 1;
                report.skipped += 1;
            }
            ItemResult::Failed(reason) => {
                report.processed += 1;
                report.failures.push(ItemFailure { index, reason });
            }
            ItemResult::Cancelled => report.cancelled = true,
        }
    }
    report.failures.sort_by_key(|f| f.index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use crate::models::Direction;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    const NETFLIX_SMS: &str =
        "Rs.199.00 debited from A/c XX1234 on 15-01-25 to NETFLIX via UPI. Ref 501234567890";

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_ingest_sms_offline() {
        let pipeline = Pipeline::offline(Database::in_memory().unwrap());
        let outcome = pipeline
            .ingest_sms("alice", &SmsInput::new(NETFLIX_SMS))
            .await
            .unwrap();

        assert!(outcome.stored);
        let tx = outcome.transaction.unwrap();
        assert_eq!(tx.amount, Decimal::new(19900, 2));
        assert_eq!(tx.direction, Direction::Debit);
        assert_eq!(tx.category, "entertainment");

        let raw = pipeline
            .db()
            .get_raw_item("alice", outcome.raw_item_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(raw.status, RawItemStatus::Fallback);
        assert_eq!(raw.transaction_id, Some(tx.id));
    }

    #[tokio::test]
    async fn test_ingest_sms_twice_is_idempotent() {
        let pipeline = Pipeline::offline(Database::in_memory().unwrap());
        let input = SmsInput::new(NETFLIX_SMS)
            .with_sender("AX-HDFCBK")
            .with_received_at(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap());

        let first = pipeline.ingest_sms("alice", &input).await.unwrap();
        let second = pipeline.ingest_sms("alice", &input).await.unwrap();

        assert!(first.stored);
        assert!(!second.stored);
        assert_eq!(second.skipped_reason.as_deref(), Some(ALREADY_INGESTED));
        assert_eq!(
            second.transaction.map(|t| t.id),
            first.transaction.map(|t| t.id)
        );
        assert_eq!(
            pipeline
                .db()
                .count_by_owner("alice", &crate::db::TransactionFilter::new())
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_non_transactional_is_not_reclassified() {
        let mock = MockBackend::new();
        let pipeline = Pipeline::new(
            Database::in_memory().unwrap(),
            Some(AIClient::Mock(mock.clone())),
            EngineConfig::default(),
        );
        let input = SmsInput::new("Your OTP is 123456. Do not share it.");

        let first = pipeline.ingest_sms("alice", &input).await.unwrap();
        assert!(!first.stored);
        let calls = mock.call_count();

        let second = pipeline.ingest_sms("alice", &input).await.unwrap();
        assert!(!second.stored);
        assert_eq!(second.skipped_reason, first.skipped_reason);
        assert_eq!(mock.call_count(), calls);
    }

    #[tokio::test]
    async fn test_empty_sms_is_rejected() {
        let pipeline = Pipeline::offline(Database::in_memory().unwrap());
        let result = pipeline.ingest_sms("alice", &SmsInput::new("   ")).await;
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_tally_sorts_failures() {
        let mut report = BatchReport::default();
        tally(
            &mut report,
            vec![
                (4, ItemResult::Failed("b".into())),
                (1, ItemResult::Failed("a".into())),
                (2, ItemResult::NotTransactional("otp".into())),
                (3, ItemResult::Duplicate { existing_id: 9 }),
                (5, ItemResult::Cancelled),
            ],
        );
        assert_eq!(report.processed, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.duplicates, 1);
        assert!(report.cancelled);
        let indexes: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_delete_missing_transaction() {
        let pipeline = Pipeline::offline(Database::in_memory().unwrap());
        let result = pipeline.delete_transaction("alice", 42).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
