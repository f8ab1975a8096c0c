//! Integration tests for pennywise-core
//!
//! These tests exercise the full ingest → reconcile → enrich workflow.

use std::time::Duration;

use base64::Engine as _;
use chrono::{TimeZone, Utc};
use pennywise_core::{
    config::{AiConfig, EngineConfig},
    db::{Database, TransactionFilter},
    models::{
        Direction, EditableField, ExtractionMethod, FileKind, RawItemStatus, SmsInput,
        TransactionEdit,
    },
    AIClient, AiExtraction, CancelToken, Error, MockBackend, Pipeline,
};
use rust_decimal::Decimal;

/// Statement export with one valid row
fn amazon_csv() -> &'static str {
    "Date,Amount,Description,Type\n2025-01-15,500.00,Amazon Purchase,Debit\n"
}

/// Four monthly Netflix charges plus one premium charge outside tolerance
fn netflix_csv() -> &'static str {
    r#"Transaction Date,Narration,Withdrawal,Deposit,Ref No
2024-01-05,Netflix,199.00,,NF0001A
2024-02-04,Netflix,199.00,,NF0002A
2024-03-05,Netflix,199.00,,NF0003A
2024-04-04,Netflix,199.00,,NF0004A
2024-04-10,Netflix,999.00,,NF0005A"#
}

/// Rows 1 and 3 are malformed
fn csv_with_bad_rows() -> &'static str {
    r#"date,amount,description,type
2025-02-01,120.00,Uber Trip,debit
2025-02-02,twelve,Swiggy,debit
2025-02-03,80.50,Metro Card,debit
not-a-date,45.00,Cafe,debit
2025-02-05,1500.00,Salary,credit"#
}

fn json_backup() -> &'static str {
    r#"{"transactions": [
        {"timestamp": "2025-03-01T09:15:00Z", "amount": "-250.00", "merchant": "Zomato", "mode": "UPI"},
        {"timestamp": "2025-03-02T18:40:00Z", "amount": "1,200.00", "merchant": "Refund from Myntra", "type": "credit"}
    ]}"#
}

fn sms_backup_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<smses count="2">
  <sms address="AX-HDFCBK" date="1736937000000" body="Rs.500.00 debited from A/c XX1234 to AMAZON on 15-01-25. UPI Ref 501234567890" />
  <sms address="AX-HDFCBK" date="1736940600000" body="Your OTP for login is 482910. Do not share it with anyone." />
</smses>"#
}

fn all_transactions(pipeline: &Pipeline, owner: &str) -> Vec<pennywise_core::Transaction> {
    pipeline
        .db()
        .list_by_owner(owner, &TransactionFilter::new())
        .unwrap()
}

fn fast_ai_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ai = AiConfig {
        timeout: Duration::from_millis(100),
        batch_max_retries: 2,
        retry_backoff: Duration::from_millis(1),
    };
    config
}

// =============================================================================
// SMS path
// =============================================================================

#[tokio::test]
async fn test_same_sms_twice_stores_one_transaction() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let input = SmsInput::new(
        "INR 2,350.00 spent on HDFC Bank Card XX9876 at AMAZON PAY INDIA on 2025-01-20. Avl bal INR 10,000",
    )
    .with_sender("VM-HDFCBK")
    .with_received_at(Utc.with_ymd_and_hms(2025, 1, 20, 14, 5, 0).unwrap());

    let first = pipeline.ingest_sms("alice", &input).await.unwrap();
    let second = pipeline.ingest_sms("alice", &input).await.unwrap();

    assert!(first.stored);
    assert!(!second.stored);
    assert_eq!(first.raw_item_id, second.raw_item_id);
    assert_eq!(all_transactions(&pipeline, "alice").len(), 1);

    // Owners never see each other's data
    assert!(all_transactions(&pipeline, "bob").is_empty());
}

#[tokio::test]
async fn test_otp_is_never_stored_with_or_without_ai() {
    let otp = SmsInput::new("Your OTP is 123456");

    let offline = Pipeline::offline(Database::in_memory().unwrap());
    let outcome = offline.ingest_sms("alice", &otp).await.unwrap();
    assert!(!outcome.stored);
    assert!(outcome.skipped_reason.is_some());

    let broken_ai = Pipeline::new(
        Database::in_memory().unwrap(),
        Some(AIClient::Mock(MockBackend::failing())),
        fast_ai_config(),
    );
    let outcome = broken_ai.ingest_sms("alice", &otp).await.unwrap();
    assert!(!outcome.stored);
    assert_eq!(
        outcome.skipped_reason.as_deref(),
        Some("fallback: no pattern match")
    );

    let healthy_ai = Pipeline::new(
        Database::in_memory().unwrap(),
        Some(AIClient::mock()),
        fast_ai_config(),
    );
    let outcome = healthy_ai.ingest_sms("alice", &otp).await.unwrap();
    assert!(!outcome.stored);
    assert!(all_transactions(&healthy_ai, "alice").is_empty());
}

#[tokio::test]
async fn test_sms_timeout_falls_back_without_retry() {
    let mock = MockBackend::new().with_delay(Duration::from_millis(500));
    let pipeline = Pipeline::new(
        Database::in_memory().unwrap(),
        Some(AIClient::Mock(mock.clone())),
        fast_ai_config(),
    );

    let started = std::time::Instant::now();
    let outcome = pipeline
        .ingest_sms(
            "alice",
            &SmsInput::new("Rs 450 debited from a/c XX5678 for UPI payment to ZOMATO. Ref 412345678901"),
        )
        .await
        .unwrap();

    assert!(outcome.stored);
    assert_eq!(mock.call_count(), 1);
    assert!(started.elapsed() < Duration::from_millis(450));
    let tx = outcome.transaction.unwrap();
    assert_eq!(tx.extraction_method, ExtractionMethod::Fallback);
    assert_eq!(tx.amount, Decimal::new(45000, 2));
}

#[tokio::test]
async fn test_batch_retries_are_bounded() {
    let mock = MockBackend::failing();
    let pipeline = Pipeline::new(
        Database::in_memory().unwrap(),
        Some(AIClient::Mock(mock.clone())),
        fast_ai_config(),
    );

    let report = pipeline
        .ingest_backup_file(
            "alice",
            FileKind::Txt,
            "Rs 300 debited from your account towards JIO RECHARGE\n",
        )
        .await
        .unwrap();

    assert_eq!(report.stored, 1);
    // One attempt plus two retries
    assert_eq!(mock.call_count(), 3);
}

// =============================================================================
// Backup file path
// =============================================================================

#[tokio::test]
async fn test_structured_row_is_deterministic() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());

    for owner in ["alice", "bob"] {
        let report = pipeline
            .ingest_backup_file(owner, FileKind::Csv, amazon_csv())
            .await
            .unwrap();
        assert_eq!(report.stored, 1);

        let txs = all_transactions(&pipeline, owner);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, Decimal::new(50000, 2));
        assert_eq!(txs[0].direction, Direction::Debit);
        assert_eq!(txs[0].merchant.as_deref(), Some("Amazon Purchase"));
        assert_eq!(txs[0].confidence, 1.0);
        assert_eq!(txs[0].category, "shopping");
    }
}

#[tokio::test]
async fn test_reimporting_a_file_counts_duplicates() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());

    let first = pipeline
        .ingest_backup_file("alice", FileKind::Csv, amazon_csv())
        .await
        .unwrap();
    let second = pipeline
        .ingest_backup_file("alice", FileKind::Csv, amazon_csv())
        .await
        .unwrap();

    assert_eq!(first.stored, 1);
    assert_eq!(second.stored, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(all_transactions(&pipeline, "alice").len(), 1);
}

#[tokio::test]
async fn test_reimport_keeps_non_transactional_rows_skipped() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());

    let first = pipeline
        .ingest_backup_file("bob", FileKind::Xml, sms_backup_xml())
        .await
        .unwrap();
    assert_eq!((first.stored, first.skipped), (1, 1));

    let second = pipeline
        .ingest_backup_file("bob", FileKind::Xml, sms_backup_xml())
        .await
        .unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.stored, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.skipped, 1);
    assert!(second.failures.is_empty());
}

#[tokio::test]
async fn test_raw_item_read_errors_stay_per_item() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let first = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv_with_bad_rows())
        .await
        .unwrap();
    assert_eq!(first.stored, 3);
    let raw_ids: Vec<i64> = pipeline
        .db()
        .list_raw_items("alice", None, 100, 0)
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();

    // Inserts still work, reads of full raw item rows do not
    pipeline
        .db()
        .conn()
        .unwrap()
        .execute_batch("ALTER TABLE raw_items RENAME COLUMN status_reason TO note")
        .unwrap();

    let second = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv_with_bad_rows())
        .await
        .unwrap();
    assert_eq!(second.processed, 5);
    assert_eq!(second.stored, 0);
    let indexes: Vec<usize> = second.failures.iter().map(|f| f.index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    assert!(second.failures[0].reason.starts_with("storage error"));
    assert!(second.failures[1].reason.contains("amount"));

    let reprocessed = pipeline.reprocess_items("alice", &raw_ids).await.unwrap();
    assert_eq!(reprocessed.processed, raw_ids.len());
    assert!(reprocessed
        .failures
        .iter()
        .all(|f| f.reason.starts_with("storage error")));
}

#[tokio::test]
async fn test_oversized_amounts_fail_rows_not_analytics() {
    let csv = "Date,Amount,Description\n\
               2025-01-15,50000000000000000000000000000,Import A\n\
               2025-01-16,70000000000000000000000000000,Import B\n\
               2025-01-17,250.00,Groceries\n";
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv)
        .await
        .unwrap();
    assert_eq!(report.stored, 1);
    let indexes: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
    assert_eq!(indexes, vec![0, 1]);

    let summary = pipeline.db().analytics_summary("alice", None, None).unwrap();
    assert_eq!(summary.total_count, 1);
    assert_eq!(summary.total_amount, Decimal::new(25000, 2));
}

#[tokio::test]
async fn test_bad_rows_are_reported_in_order() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv_with_bad_rows())
        .await
        .unwrap();

    assert_eq!(report.processed, 5);
    assert_eq!(report.stored, 3);
    let indexes: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
    assert_eq!(indexes, vec![1, 3]);
    assert!(report.failures[0].reason.contains("amount"));
    assert!(report.failures[1].reason.contains("date"));

    let salary = all_transactions(&pipeline, "alice")
        .into_iter()
        .find(|t| t.merchant.as_deref() == Some("Salary"))
        .unwrap();
    assert_eq!(salary.direction, Direction::Credit);
}

#[tokio::test]
async fn test_cross_item_duplicates_collapse() {
    let csv = r#"Date,Amount,Description,Reference
2025-01-15 10:30:05,750.00,Flipkart Order,UTR998877
2025-01-15 10:30:48,750.00,FLIPKART INTERNET PVT LTD,UTR998877
2025-01-15 10:30:48,750.00,Flipkart Order,UTR998878"#;

    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv)
        .await
        .unwrap();

    assert_eq!(report.stored, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(all_transactions(&pipeline, "alice").len(), 2);
}

#[tokio::test]
async fn test_rows_without_reference_stay_distinct() {
    let csv = "Date,Amount,Description\n2025-01-15 08:00,60.00,Chai Point\n2025-01-15 08:00,60.00,Chai Point Cafe\n";

    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, csv)
        .await
        .unwrap();
    assert_eq!(report.stored, 2);
    assert_eq!(report.duplicates, 0);
}

#[tokio::test]
async fn test_json_and_xml_backups() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());

    let json = pipeline
        .ingest_backup_file("alice", FileKind::Json, json_backup())
        .await
        .unwrap();
    assert_eq!(json.stored, 2);

    let txs = all_transactions(&pipeline, "alice");
    let zomato = txs
        .iter()
        .find(|t| t.merchant.as_deref() == Some("Zomato"))
        .unwrap();
    assert_eq!(zomato.direction, Direction::Debit);
    assert_eq!(zomato.amount, Decimal::new(25000, 2));
    assert_eq!(zomato.category, "grocery");

    let xml = pipeline
        .ingest_backup_file("bob", FileKind::Xml, sms_backup_xml())
        .await
        .unwrap();
    assert_eq!(xml.processed, 2);
    assert_eq!(xml.stored, 1);
    assert_eq!(xml.skipped, 1);

    let stats = pipeline.db().raw_item_stats("bob").unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.top_senders[0].sender, "AX-HDFCBK");
}

#[tokio::test]
async fn test_base64_backup_and_validation() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let encoded = base64::engine::general_purpose::STANDARD.encode(amazon_csv());

    let validation = pipeline.validate_backup("csv", &encoded).unwrap();
    assert!(validation.was_base64);
    assert_eq!(validation.decoded_bytes, amazon_csv().len());

    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, &encoded)
        .await
        .unwrap();
    assert_eq!(report.stored, 1);

    assert!(matches!(
        pipeline.validate_backup("pdf", "JVBERi0xLjQ="),
        Err(Error::UnsupportedFileKind(_))
    ));
    assert!(matches!(
        pipeline.validate_backup("csv", "   "),
        Err(Error::InvalidData(_))
    ));
}

#[tokio::test]
async fn test_cancelled_batch_keeps_stored_items() {
    let mut config = EngineConfig::default();
    config.pipeline.max_concurrency = 1;
    let pipeline = Pipeline::new(
        Database::in_memory().unwrap(),
        Some(AIClient::Mock(
            MockBackend::new().with_delay(Duration::from_millis(50)),
        )),
        config,
    );

    let lines: String = (1..=8)
        .map(|i| format!("Rs {}.00 debited from your account to SHOP{}\n", i * 10, i))
        .collect();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let report = pipeline
        .ingest_backup_file_with_cancel("alice", FileKind::Txt, &lines, &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.stored < 8);
    assert_eq!(all_transactions(&pipeline, "alice").len(), report.stored);
}

// =============================================================================
// Enrichment and user edits
// =============================================================================

#[tokio::test]
async fn test_recurring_detection_on_imported_history() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let report = pipeline
        .ingest_backup_file("alice", FileKind::Csv, netflix_csv())
        .await
        .unwrap();
    assert_eq!(report.stored, 5);

    let enrichment = pipeline.run_enrichment("alice").await.unwrap();
    assert_eq!(enrichment.recurring_groups_found, 1);

    let txs = all_transactions(&pipeline, "alice");
    let monthly: Vec<_> = txs
        .iter()
        .filter(|t| t.amount == Decimal::new(19900, 2))
        .collect();
    assert_eq!(monthly.len(), 4);
    let group = monthly[0].recurring_group_id.clone();
    assert!(group.is_some());
    assert!(monthly.iter().all(|t| t.recurring_group_id == group));

    let premium = txs
        .iter()
        .find(|t| t.amount == Decimal::new(99900, 2))
        .unwrap();
    assert_eq!(premium.recurring_group_id, None);

    // Re-running assigns the same group
    pipeline.run_enrichment("alice").await.unwrap();
    let again = pipeline
        .db()
        .get_transaction("alice", monthly[0].id)
        .unwrap()
        .unwrap();
    assert_eq!(again.recurring_group_id, group);

    // Deleting one member leaves the siblings' group alone
    pipeline
        .delete_transaction("alice", monthly[1].id)
        .await
        .unwrap();
    let sibling = pipeline
        .db()
        .get_transaction("alice", monthly[2].id)
        .unwrap()
        .unwrap();
    assert_eq!(sibling.recurring_group_id, group);

    let raw = pipeline
        .db()
        .get_raw_item("alice", monthly[1].source_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(raw.transaction_id, None);
    assert_eq!(raw.status, RawItemStatus::Parsed);
}

#[tokio::test]
async fn test_user_category_survives_reprocessing() {
    let db = Database::in_memory().unwrap();
    let offline = Pipeline::offline(db.clone());
    let sms = SmsInput::new("Rs.199.00 debited from A/c XX1234 to NETFLIX via UPI. Ref 501234567890");

    let outcome = offline.ingest_sms("alice", &sms).await.unwrap();
    let tx = outcome.transaction.unwrap();
    assert_eq!(tx.extraction_method, ExtractionMethod::Fallback);

    let edit = TransactionEdit {
        category: Some("subscriptions".to_string()),
        ..Default::default()
    };
    offline.edit_transaction("alice", tx.id, &edit).await.unwrap();

    // A better model comes online and re-reads the message
    let mock = MockBackend::new().with_response(
        "NETFLIX",
        AiExtraction {
            is_transaction: true,
            confidence: Some(0.95),
            reason: Some("subscription debit".to_string()),
            transaction_type: Some("debit".to_string()),
            amount: Some(serde_json::json!(249.0)),
            merchant: Some("Netflix India".to_string()),
            reference_number: Some("501234567890".to_string()),
            payment_method: Some("upi".to_string()),
            ..Default::default()
        },
    );
    let online = Pipeline::new(db, Some(AIClient::Mock(mock)), EngineConfig::default());

    let report = online.reprocess_unparsed("alice").await.unwrap();
    assert_eq!(report.stored, 1);

    let refreshed = online.db().get_transaction("alice", tx.id).unwrap().unwrap();
    assert_eq!(refreshed.category, "subscriptions");
    assert!(refreshed.is_user_edited(EditableField::Category));
    assert_eq!(refreshed.merchant.as_deref(), Some("Netflix India"));
    assert_eq!(refreshed.amount, Decimal::new(24900, 2));
    assert_eq!(refreshed.extraction_method, ExtractionMethod::Ai);
    assert_eq!(all_transactions(&online, "alice").len(), 1);

    // Now resolved by the AI, so nothing is left to reprocess
    let raw = online
        .db()
        .get_raw_item("alice", outcome.raw_item_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(raw.status, RawItemStatus::Parsed);
    let nothing = online.reprocess_unparsed("alice").await.unwrap();
    assert_eq!(nothing.processed, 0);
}

#[tokio::test]
async fn test_reprocess_items_reports_missing_ids() {
    let pipeline = Pipeline::offline(Database::in_memory().unwrap());
    let outcome = pipeline
        .ingest_sms("alice", &SmsInput::new("Rs 99 paid to BLINKIT via UPI"))
        .await
        .unwrap();
    let raw_id = outcome.raw_item_id.unwrap();

    let report = pipeline
        .reprocess_items("alice", &[raw_id, 424242])
        .await
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.stored, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(all_transactions(&pipeline, "alice").len(), 1);
}
