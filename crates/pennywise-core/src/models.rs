//! Domain models for Pennywise

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category assigned when no keyword matches
pub const UNCATEGORIZED: &str = "uncategorized";

/// Where a raw item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Sms,
    CsvRow,
    XmlNode,
    TxtLine,
    JsonObject,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::CsvRow => "csv_row",
            Self::XmlNode => "xml_node",
            Self::TxtLine => "txt_line",
            Self::JsonObject => "json_object",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "csv_row" => Ok(Self::CsvRow),
            "xml_node" => Ok(Self::XmlNode),
            "txt_line" => Ok(Self::TxtLine),
            "json_object" => Ok(Self::JsonObject),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supported backup file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xml,
    Txt,
    Json,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Txt => "txt",
            Self::Json => "json",
        }
    }

    /// Source kind of the records this file yields
    pub fn source_kind(&self) -> SourceKind {
        match self {
            Self::Csv => SourceKind::CsvRow,
            Self::Xml => SourceKind::XmlNode,
            Self::Txt => SourceKind::TxtLine,
            Self::Json => SourceKind::JsonObject,
        }
    }

    /// Guess from a file name extension
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xml" => Ok(Self::Xml),
            "txt" | "text" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            "pdf" => Err("PDF backups are not supported; export as CSV or JSON".to_string()),
            _ => Err(format!("Unsupported file kind: {}", s)),
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of incoming data before classification/extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_kind: SourceKind,
    /// Message body, or the JSON of `structured_fields` for file rows
    pub raw_text: String,
    /// Original field name -> value, for structured file rows
    pub structured_fields: Option<BTreeMap<String, String>>,
    pub received_at: DateTime<Utc>,
    pub owner_id: String,
    /// SMS sender id (e.g. "AX-HDFCBK") or XML `address`
    pub sender: Option<String>,
    /// Stable identity of the payload; unique per owner in storage
    pub fingerprint: String,
}

impl RawItem {
    /// Free text goes through the classifier; structured rows bypass it
    pub fn is_free_text(&self) -> bool {
        self.structured_fields.is_none()
    }
}

/// Processing state of a stored raw item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RawItemStatus {
    /// Stored, not yet resolved
    #[default]
    Pending,
    /// Resolved definitively (AI decision or structured row)
    Parsed,
    /// Resolved only by the local fallback path
    Fallback,
    /// Extraction or storage failed
    Failed,
}

impl RawItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }

    pub fn is_unparsed(&self) -> bool {
        !matches!(self, Self::Parsed)
    }
}

impl std::str::FromStr for RawItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "parsed" => Ok(Self::Parsed),
            "fallback" => Ok(Self::Fallback),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown raw item status: {}", s)),
        }
    }
}

impl std::fmt::Display for RawItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw item as persisted, with its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRawItem {
    pub id: i64,
    #[serde(flatten)]
    pub item: RawItem,
    pub status: RawItemStatus,
    /// Why the item was skipped or failed
    pub status_reason: Option<String>,
    pub transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transactional judgment for free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_transactional: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub reason: String,
}

/// Money movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
    #[default]
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transaction's fields were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Ai,
    Fallback,
    Manual,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ai" => Ok(Self::Ai),
            "fallback" => Ok(Self::Fallback),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown extraction method: {}", s)),
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured record produced by the extractor (not persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTransaction {
    /// Always non-negative
    pub amount: Decimal,
    pub direction: Direction,
    pub merchant: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub reference_number: Option<String>,
    /// Masked account or card identifier, e.g. "XX1234"
    pub account_hint: Option<String>,
    pub payment_mode: Option<String>,
    pub bank_hint: Option<String>,
    pub remarks: Option<String>,
    /// Category supplied by the source (file column), if any
    pub category_hint: Option<String>,
    /// Source reports a failed or declined transaction
    pub failed: bool,
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
}

/// Extraction produced nothing usable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Transaction fields a user can edit; automated passes leave them alone once touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditableField {
    Category,
    Merchant,
    Remarks,
    Failed,
}

impl EditableField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Merchant => "merchant",
            Self::Remarks => "remarks",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EditableField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category" => Ok(Self::Category),
            "merchant" => Ok(Self::Merchant),
            "remarks" => Ok(Self::Remarks),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown editable field: {}", s)),
        }
    }
}

/// The canonical, persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// 0 until persisted
    pub id: i64,
    pub owner_id: String,
    /// Storage id of the originating raw item; None for manual entries
    pub source_id: Option<i64>,
    pub ts: DateTime<Utc>,
    pub amount: Decimal,
    pub direction: Direction,
    pub merchant: Option<String>,
    pub category: String,
    pub payment_mode: Option<String>,
    pub reference_number: Option<String>,
    pub account_hint: Option<String>,
    pub bank_hint: Option<String>,
    pub remarks: Option<String>,
    pub failed: bool,
    pub recurring_group_id: Option<String>,
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
    /// Classifier reason, for provenance
    pub classification_reason: Option<String>,
    pub user_edited: BTreeSet<EditableField>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_user_edited(&self, field: EditableField) -> bool {
        self.user_edited.contains(&field)
    }
}

/// A transaction entered by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualTransaction {
    pub ts: DateTime<Utc>,
    pub amount: Decimal,
    pub direction: Direction,
    pub merchant: Option<String>,
    /// Explicit category; marked as user-edited when given
    pub category: Option<String>,
    pub payment_mode: Option<String>,
    pub reference_number: Option<String>,
    pub account_hint: Option<String>,
    pub remarks: Option<String>,
    #[serde(default)]
    pub failed: bool,
}

/// User patch for a stored transaction; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionEdit {
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub remarks: Option<String>,
    pub failed: Option<bool>,
}

impl TransactionEdit {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.merchant.is_none()
            && self.remarks.is_none()
            && self.failed.is_none()
    }

    pub fn touched_fields(&self) -> Vec<EditableField> {
        let mut fields = Vec::new();
        if self.category.is_some() {
            fields.push(EditableField::Category);
        }
        if self.merchant.is_some() {
            fields.push(EditableField::Merchant);
        }
        if self.remarks.is_some() {
            fields.push(EditableField::Remarks);
        }
        if self.failed.is_some() {
            fields.push(EditableField::Failed);
        }
        fields
    }
}

/// Incoming SMS payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsInput {
    pub text: String,
    /// Sender-reported time; ingestion time when absent
    pub received_at: Option<DateTime<Utc>>,
    pub sender: Option<String>,
}

impl SmsInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: None,
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }
}

/// Result of single-message ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsOutcome {
    pub stored: bool,
    pub transaction: Option<Transaction>,
    pub skipped_reason: Option<String>,
    /// Storage id of the raw message
    pub raw_item_id: Option<i64>,
}

/// One failed item in a batch, by input position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub index: usize,
    pub reason: String,
}

/// Summary of a batch import or reprocessing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub stored: usize,
    pub duplicates: usize,
    /// Sorted by index
    pub failures: Vec<ItemFailure>,
    /// Items judged non-transactional (free-text lines only)
    pub skipped: usize,
    /// The run was cancelled before every item was handled
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub recurring_groups_found: usize,
    pub categorized: usize,
}

/// Outcome of validating a backup upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupValidation {
    pub file_kind: FileKind,
    /// Whether the content arrived base64-encoded
    pub was_base64: bool,
    pub decoded_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: i64,
}

/// Raw item statistics for one owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItemStats {
    pub total: i64,
    pub parsed: i64,
    pub unparsed: i64,
    /// Percentage of items parsed, 0-100
    pub parsing_rate: f64,
    pub top_senders: Vec<SenderCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionTotal {
    pub direction: Direction,
    pub count: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedTotal {
    pub name: String,
    pub count: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyTrend {
    /// "YYYY-MM"
    pub month: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub count: i64,
}

/// Analytics over an owner's transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub total_count: i64,
    pub total_amount: Decimal,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub average_amount: Decimal,
    pub by_direction: Vec<DirectionTotal>,
    pub top_merchants: Vec<NamedTotal>,
    pub top_categories: Vec<NamedTotal>,
    pub monthly_trends: Vec<MonthlyTrend>,
    pub failed_count: i64,
    pub recurring_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_parsing() {
        assert_eq!("CSV".parse::<FileKind>().unwrap(), FileKind::Csv);
        assert_eq!(".json".parse::<FileKind>().unwrap(), FileKind::Json);
        assert_eq!("text".parse::<FileKind>().unwrap(), FileKind::Txt);
        assert!("pdf".parse::<FileKind>().unwrap_err().contains("PDF"));
        assert!("xlsx".parse::<FileKind>().is_err());
        assert_eq!(
            FileKind::from_path(std::path::Path::new("backup.XML")),
            Some(FileKind::Xml)
        );
    }

    #[test]
    fn test_status_unparsed() {
        assert!(!RawItemStatus::Parsed.is_unparsed());
        assert!(RawItemStatus::Pending.is_unparsed());
        assert!(RawItemStatus::Fallback.is_unparsed());
        assert!(RawItemStatus::Failed.is_unparsed());
    }

    #[test]
    fn test_enum_round_trip_through_str() {
        for d in [Direction::Debit, Direction::Credit, Direction::Unknown] {
            assert_eq!(d.as_str().parse::<Direction>().unwrap(), d);
        }
        for k in [
            SourceKind::Sms,
            SourceKind::CsvRow,
            SourceKind::XmlNode,
            SourceKind::TxtLine,
            SourceKind::JsonObject,
        ] {
            assert_eq!(k.as_str().parse::<SourceKind>().unwrap(), k);
        }
    }

    #[test]
    fn test_edit_touched_fields() {
        let edit = TransactionEdit {
            category: Some("bills".into()),
            failed: Some(true),
            ..Default::default()
        };
        assert_eq!(
            edit.touched_fields(),
            vec![EditableField::Category, EditableField::Failed]
        );
        assert!(TransactionEdit::default().is_empty());
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        let json = serde_json::to_string(&Direction::Debit).unwrap();
        assert_eq!(json, "\"debit\"");
    }
}
