//! Input adapter
//!
//! Normalizes SMS payloads and backup files (CSV, XML, TXT, JSON) into
//! [`RawItem`]s. Column names are resolved through a flat synonym table, so
//! no per-bank parsing branches exist. One malformed row never aborts a file.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::extract::{parse_amount, parse_amount_unbounded, parse_datetime};
use crate::models::{BackupValidation, FileKind, RawItem, SmsInput, SourceKind};

/// A malformed row or line; reported per index, never fatal for the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterParseError {
    pub index: usize,
    pub reason: String,
}

/// Logical fields a file column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalField {
    Date,
    Amount,
    Debit,
    Credit,
    Description,
    Type,
    Category,
    Mode,
    Remarks,
    Reference,
    Sender,
}

/// Synonyms per logical field, in priority order
const SYNONYMS: &[(LogicalField, &[&str])] = &[
    (
        LogicalField::Date,
        &[
            "date", "timestamp", "transaction_date", "txn_date", "value_date", "posted_date",
            "datetime", "time",
        ],
    ),
    (
        LogicalField::Amount,
        &["amount", "amt", "transaction_amount", "txn_amount", "value"],
    ),
    (
        LogicalField::Debit,
        &["debit", "withdrawal", "withdrawal_amount", "debit_amount"],
    ),
    (
        LogicalField::Credit,
        &["credit", "deposit", "deposit_amount", "credit_amount"],
    ),
    (
        LogicalField::Description,
        &[
            "description", "merchant", "narration", "details", "particulars", "payee", "name",
            "body", "message",
        ],
    ),
    (
        LogicalField::Type,
        &["type", "transaction_type", "txn_type", "dr_cr", "cr_dr"],
    ),
    (LogicalField::Category, &["category"]),
    (
        LogicalField::Mode,
        &["mode", "payment_mode", "payment_method", "method", "channel"],
    ),
    (
        LogicalField::Remarks,
        &["remarks", "note", "notes", "memo", "comment"],
    ),
    (
        LogicalField::Reference,
        &[
            "reference", "ref", "reference_number", "ref_no", "utr", "transaction_id", "txn_id",
            "cheque_no",
        ],
    ),
    (LogicalField::Sender, &["address", "sender", "from"]),
];

/// Keys whose presence (without an amount) marks a record as a message
const MESSAGE_KEYS: &[&str] = &["body", "message", "text", "sms"];

/// A structured record after synonym resolution and value parsing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRow {
    pub date: Option<DateTime<Utc>>,
    /// Signed; negative means money out
    pub amount: Option<Decimal>,
    pub debit_amount: Option<Decimal>,
    pub credit_amount: Option<Decimal>,
    pub description: Option<String>,
    pub type_text: Option<String>,
    pub category: Option<String>,
    pub mode: Option<String>,
    pub remarks: Option<String>,
    pub reference: Option<String>,
}

impl ResolvedRow {
    pub fn has_amount(&self) -> bool {
        self.amount.is_some() || self.debit_amount.is_some() || self.credit_amount.is_some()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '-' | '.' | '/' => '_',
            other => other,
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Non-empty values keyed by normalized column name
fn normalized_values(fields: &BTreeMap<String, String>) -> HashMap<String, &str> {
    fields
        .iter()
        .map(|(k, v)| (normalize_key(k), v.trim()))
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

fn lookup<'a>(values: &HashMap<String, &'a str>, field: LogicalField) -> Option<&'a str> {
    SYNONYMS
        .iter()
        .find(|(f, _)| *f == field)
        .and_then(|(_, names)| names.iter().find_map(|name| values.get(*name).copied()))
}

/// Resolve heterogeneous column names into logical fields
///
/// Unknown columns are ignored and missing fields stay `None`. A present but
/// unparsable date or amount is an error for the row.
pub fn resolve_fields(fields: &BTreeMap<String, String>) -> std::result::Result<ResolvedRow, String> {
    let values = normalized_values(fields);
    if values.is_empty() {
        return Err("row has no values".to_string());
    }

    let date = match lookup(&values, LogicalField::Date) {
        Some(raw) => Some(parse_datetime(raw).ok_or_else(|| format!("unparsable date '{}'", raw))?),
        None => None,
    };

    let amount_field = |field: LogicalField| -> std::result::Result<Option<Decimal>, String> {
        match lookup(&values, field) {
            Some(raw) => match parse_amount(raw) {
                Some(value) => Ok(Some(value)),
                None if parse_amount_unbounded(raw).is_some() => {
                    Err(format!("amount '{}' exceeds the supported range", raw))
                }
                None => Err(format!("non-numeric amount '{}'", raw)),
            },
            None => Ok(None),
        }
    };
    let amount = amount_field(LogicalField::Amount)?;
    let debit_amount = amount_field(LogicalField::Debit)?;
    let credit_amount = amount_field(LogicalField::Credit)?;

    let text = |field: LogicalField| lookup(&values, field).map(str::to_string);

    Ok(ResolvedRow {
        date,
        amount,
        debit_amount,
        credit_amount,
        description: text(LogicalField::Description),
        type_text: text(LogicalField::Type),
        category: text(LogicalField::Category),
        mode: text(LogicalField::Mode),
        remarks: text(LogicalField::Remarks),
        reference: text(LogicalField::Reference),
    })
}

/// Normalize one SMS into a raw item
pub fn normalize_sms(owner_id: &str, input: &SmsInput) -> Result<RawItem> {
    if input.text.trim().is_empty() {
        return Err(Error::InvalidData("SMS text is empty".into()));
    }

    let sender = input
        .sender
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let reported_at = input.received_at.map(|t| t.to_rfc3339());
    let fingerprint = fingerprint(
        SourceKind::Sms,
        sender.as_deref(),
        &input.text,
        reported_at.as_deref(),
        0,
    );

    Ok(RawItem {
        source_kind: SourceKind::Sms,
        raw_text: input.text.clone(),
        structured_fields: None,
        received_at: input.received_at.unwrap_or_else(Utc::now),
        owner_id: owner_id.to_string(),
        sender,
        fingerprint,
    })
}

/// SHA-256 identity of a raw payload
pub fn fingerprint(
    kind: SourceKind,
    sender: Option<&str>,
    text: &str,
    reported_at: Option<&str>,
    ordinal: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(sender.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(reported_at.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(ordinal.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Decode base64 content when it is valid base64 of UTF-8 text
///
/// Returns the text and whether it was decoded.
pub fn decode_content(content: &str) -> (String, bool) {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let looks_encoded = compact.len() >= 4
        && compact.len() % 4 == 0
        && !content.trim().contains(' ')
        && compact
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='));

    if looks_encoded {
        if let Ok(bytes) = BASE64.decode(compact.as_bytes()) {
            if let Ok(text) = String::from_utf8(bytes) {
                return (text, true);
            }
        }
    }
    (content.to_string(), false)
}

/// Check a backup upload before processing it
pub fn validate_backup(kind: &str, content: &str) -> Result<BackupValidation> {
    let file_kind: FileKind = kind.parse().map_err(Error::UnsupportedFileKind)?;
    if content.trim().is_empty() {
        return Err(Error::InvalidData("file content is empty".into()));
    }

    let (decoded, was_base64) = decode_content(content);
    if decoded.trim().is_empty() {
        return Err(Error::InvalidData("file content is empty after decoding".into()));
    }

    Ok(BackupValidation {
        file_kind,
        was_base64,
        decoded_bytes: decoded.len(),
    })
}

/// One parsed record of a backup file
#[derive(Debug, Clone)]
enum Record {
    Fields(BTreeMap<String, String>),
    Line(String),
}

/// The items of one backup file
///
/// Parsing happens up front; raw items are built lazily by [`BackupItems::iter`],
/// which can be called any number of times.
#[derive(Debug, Clone)]
pub struct BackupItems {
    owner_id: String,
    kind: FileKind,
    imported_at: DateTime<Utc>,
    records: Vec<std::result::Result<Record, String>>,
}

impl BackupItems {
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Number of records, including malformed ones
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw items in file order; malformed records come out as errors
    pub fn iter(&self) -> impl Iterator<Item = std::result::Result<RawItem, AdapterParseError>> + '_ {
        self.records
            .iter()
            .enumerate()
            .scan(HashMap::<String, usize>::new(), move |seen, (index, record)| {
                let item = match record {
                    Ok(record) => self.build_item(record, seen),
                    Err(reason) => Err(reason.clone()),
                };
                Some(item.map_err(|reason| AdapterParseError { index, reason }))
            })
    }

    fn build_item(
        &self,
        record: &Record,
        seen: &mut HashMap<String, usize>,
    ) -> std::result::Result<RawItem, String> {
        let source_kind = self.kind.source_kind();

        let (raw_text, structured_fields, received_at, sender) = match record {
            Record::Line(line) => (line.clone(), None, self.imported_at, None),
            Record::Fields(fields) => {
                let row = resolve_fields(fields)?;
                let values = normalized_values(fields);
                let sender = lookup(&values, LogicalField::Sender).map(str::to_string);
                let message = MESSAGE_KEYS.iter().find_map(|k| values.get(*k).copied());

                match message {
                    // Message-style record (SMS backup): classify its text
                    Some(body) if !row.has_amount() => (
                        body.to_string(),
                        None,
                        row.date.unwrap_or(self.imported_at),
                        sender,
                    ),
                    _ => {
                        let text = serde_json::to_string(fields).map_err(|e| e.to_string())?;
                        (
                            text,
                            Some(fields.clone()),
                            row.date.unwrap_or(self.imported_at),
                            None,
                        )
                    }
                }
            }
        };

        let occurrence_key = format!("{}|{}", sender.as_deref().unwrap_or(""), raw_text);
        let ordinal = seen.entry(occurrence_key).or_insert(0);
        let fingerprint = fingerprint(source_kind, sender.as_deref(), &raw_text, None, *ordinal);
        *ordinal += 1;

        Ok(RawItem {
            source_kind,
            raw_text,
            structured_fields,
            received_at,
            owner_id: self.owner_id.clone(),
            sender,
            fingerprint,
        })
    }
}

/// Normalize a backup file into raw items
///
/// `content` may be base64. Only an unreadable file as a whole is an error;
/// individual bad rows are reported by [`BackupItems::iter`].
pub fn normalize_file(
    owner_id: &str,
    kind: FileKind,
    content: &str,
    imported_at: DateTime<Utc>,
) -> Result<BackupItems> {
    let (text, was_base64) = decode_content(content);
    if text.trim().is_empty() {
        return Err(Error::InvalidData("file content is empty".into()));
    }

    let records = match kind {
        FileKind::Csv => parse_csv(&text, b','),
        FileKind::Json => parse_json(&text)?,
        FileKind::Xml => parse_xml(&text)?,
        FileKind::Txt => parse_txt(&text),
    };

    debug!(
        kind = %kind,
        was_base64,
        records = records.len(),
        "Normalized backup file"
    );

    Ok(BackupItems {
        owner_id: owner_id.to_string(),
        kind,
        imported_at,
        records,
    })
}

fn parse_csv(text: &str, delimiter: u8) -> Vec<std::result::Result<Record, String>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => return vec![Err(format!("unreadable header: {}", e))],
    };

    rdr.records()
        .filter(|r| !matches!(r, Ok(rec) if rec.iter().all(|v| v.trim().is_empty())))
        .map(|result| {
            let record = result.map_err(|e| format!("malformed row: {}", e))?;
            let fields = headers
                .iter()
                .zip(record.iter())
                .filter(|(h, _)| !h.trim().is_empty())
                .map(|(h, v)| (h.trim().to_string(), v.to_string()))
                .collect();
            Ok(Record::Fields(fields))
        })
        .collect()
}

fn parse_txt(text: &str) -> Vec<std::result::Result<Record, String>> {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    // Delimited table when the header names at least two logical fields
    for delimiter in ['|', '\t', ';', ','] {
        if !first_line.contains(delimiter) {
            continue;
        }
        let resolved = first_line
            .split(delimiter)
            .filter(|h| {
                let key = normalize_key(h);
                SYNONYMS.iter().any(|(_, names)| names.contains(&key.as_str()))
            })
            .count();
        if resolved >= 2 {
            let mut buf = [0u8; 4];
            let byte = delimiter.encode_utf8(&mut buf).as_bytes()[0];
            return parse_csv(text, byte);
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| Ok(Record::Line(l.to_string())))
        .collect()
}

/// Keys that conventionally wrap a list of records in JSON exports
const WRAPPER_KEYS: &[&str] = &[
    "transactions",
    "records",
    "items",
    "data",
    "rows",
    "entries",
    "messages",
    "sms",
];

fn is_record_list(key: &str, value: &Value) -> bool {
    value.is_array() && WRAPPER_KEYS.contains(&normalize_key(key).as_str())
}

fn holds_objects(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.iter().any(Value::is_object))
}

fn parse_json(text: &str) -> Result<Vec<std::result::Result<Record, String>>> {
    let value: Value = serde_json::from_str(text)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            // An object holding an array of records, or a single record
            let wrapped = map
                .iter()
                .find(|(k, v)| is_record_list(k, v))
                .or_else(|| map.iter().find(|(_, v)| holds_objects(v)));
            match wrapped {
                Some((_, Value::Array(items))) => items.clone(),
                _ => vec![Value::Object(map)],
            }
        }
        _ => {
            return Err(Error::InvalidData(
                "JSON backup must be an object or an array of objects".into(),
            ))
        }
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(Record::Fields(
                map.into_iter()
                    .filter_map(|(k, v)| json_scalar(&v).map(|s| (k, s)))
                    .collect(),
            )),
            Value::String(s) if !s.trim().is_empty() => Ok(Record::Line(s)),
            other => Err(format!("expected an object, found {}", json_kind(&other))),
        })
        .collect())
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

struct XmlPatterns {
    declaration: Regex,
    open_tag: Regex,
    attribute: Regex,
    leaf: Regex,
}

fn xml_patterns() -> &'static XmlPatterns {
    static PATTERNS: OnceLock<XmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| XmlPatterns {
        declaration: Regex::new(r"(?s)<\?.*?\?>|<!--.*?-->|<!DOCTYPE[^>]*>").expect("valid regex"),
        open_tag: Regex::new(
            r#"<([A-Za-z_][\w.-]*)((?:\s+[\w:.-]+\s*=\s*(?:'[^']*'|"[^"]*"))*)\s*(/?)>"#,
        )
        .expect("valid regex"),
        attribute: Regex::new(r#"([\w:.-]+)\s*=\s*(?:'([^']*)'|"([^"]*)")"#).expect("valid regex"),
        leaf: Regex::new(r"<([A-Za-z_][\w.-]*)[^>/]*>([^<]*)</([A-Za-z_][\w.-]*)\s*>")
            .expect("valid regex"),
    })
}

/// Scan an XML document for record elements
///
/// Records are either self-closing elements carrying attributes (SMS backup
/// style) or elements whose children are text leaves. The root wrapper is
/// skipped.
fn parse_xml(text: &str) -> Result<Vec<std::result::Result<Record, String>>> {
    let p = xml_patterns();
    let body = p.declaration.replace_all(text, "");
    let body = body.trim();

    if !body.starts_with('<') {
        return Err(Error::InvalidData("content is not XML".into()));
    }

    let mut rest = strip_root(body);
    let mut records = Vec::new();

    while let Some(caps) = p.open_tag.captures(rest) {
        let Some(whole) = caps.get(0) else { break };
        let name = caps[1].to_string();
        let after = &rest[whole.end()..];

        let mut fields: BTreeMap<String, String> = caps
            .get(2)
            .map(|attrs| {
                p.attribute
                    .captures_iter(attrs.as_str())
                    .filter_map(|a| {
                        let value = a.get(2).or_else(|| a.get(3))?;
                        Some((a[1].to_string(), decode_entities(value.as_str())))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if &caps[3] == "/" {
            rest = after;
        } else {
            let closing = format!("</{}>", name);
            let Some(end) = after.find(&closing) else {
                records.push(Err(format!("unclosed <{}> element", name)));
                break;
            };
            let children = &after[..end];
            if children.contains('<') {
                for leaf in p.leaf.captures_iter(children) {
                    if leaf[1] == leaf[3] {
                        fields.insert(leaf[1].to_string(), decode_entities(leaf[2].trim()));
                    }
                }
            } else if !children.trim().is_empty() {
                fields.insert(name.clone(), decode_entities(children.trim()));
            }
            rest = &after[end + closing.len()..];
        }

        if fields.is_empty() {
            records.push(Err(format!("<{}> element carries no fields", name)));
        } else {
            records.push(Ok(Record::Fields(fields)));
        }
    }

    Ok(records)
}

/// Drop the outermost wrapper element when it encloses the whole document
fn strip_root(body: &str) -> &str {
    let Some(open_end) = body.find('>') else {
        return body;
    };
    let open = &body[1..open_end];
    if open.ends_with('/') {
        return body;
    }
    let root = open.split_whitespace().next().unwrap_or("");
    let closing = format!("</{}>", root);
    if !root.is_empty() && body.trim_end().ends_with(&closing) {
        let end = body.trim_end().len() - closing.len();
        if open_end + 1 <= end {
            return &body[open_end + 1..end];
        }
    }
    body
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn imported() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn items(kind: FileKind, content: &str) -> Vec<std::result::Result<RawItem, AdapterParseError>> {
        normalize_file("u1", kind, content, imported())
            .unwrap()
            .iter()
            .collect()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(" Transaction Date "), "transaction_date");
        assert_eq!(normalize_key("Ref.No"), "ref_no");
        assert_eq!(normalize_key("Dr/Cr"), "dr_cr");
    }

    #[test]
    fn test_resolve_fields_synonyms() {
        let fields: BTreeMap<String, String> = [
            ("Txn Date", "15/01/2025"),
            ("AMT", "1,200.50"),
            ("Narration", "UPI-SWIGGY"),
            ("Payment Mode", "UPI"),
            ("Notes", "dinner"),
            ("UTR", "UTR123456"),
            ("Balance", "9,000"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let row = resolve_fields(&fields).unwrap();
        assert_eq!(row.amount, Some(Decimal::from_str("1200.50").unwrap()));
        assert_eq!(row.description.as_deref(), Some("UPI-SWIGGY"));
        assert_eq!(row.mode.as_deref(), Some("UPI"));
        assert_eq!(row.remarks.as_deref(), Some("dinner"));
        assert_eq!(row.reference.as_deref(), Some("UTR123456"));
        assert_eq!(row.date.unwrap().date_naive().to_string(), "2025-01-15");
    }

    #[test]
    fn test_resolve_fields_bad_values() {
        let bad_amount: BTreeMap<String, String> =
            [("amount".to_string(), "twelve".to_string())].into();
        assert!(resolve_fields(&bad_amount).unwrap_err().contains("non-numeric amount"));

        let bad_date: BTreeMap<String, String> =
            [("date".to_string(), "someday".to_string())].into();
        assert!(resolve_fields(&bad_date).unwrap_err().contains("unparsable date"));
    }

    #[test]
    fn test_normalize_sms() {
        let input = SmsInput::new("INR 100 debited").with_sender("AX-ICICI");
        let a = normalize_sms("u1", &input).unwrap();
        let b = normalize_sms("u1", &input).unwrap();
        assert_eq!(a.source_kind, SourceKind::Sms);
        assert!(a.structured_fields.is_none());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.sender.as_deref(), Some("AX-ICICI"));

        assert!(normalize_sms("u1", &SmsInput::new("   ")).is_err());
    }

    #[test]
    fn test_csv_rows_and_bad_row_isolation() {
        let csv = "Date,Amount,Description,Type\n\
                   2025-01-15,500.00,Amazon Purchase,Debit\n\
                   2025-01-16,abc,Broken,Debit\n\
                   2025-01-17,20.00,Tea,Debit\n";
        let out = items(FileKind::Csv, csv);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(err.reason.contains("non-numeric amount"));

        let huge = "Date,Amount,Description\n\
                    2025-01-15,50000000000000000000000000000,Import A\n\
                    2025-01-15,70000000000000000000000000000,Import B\n\
                    2025-01-16,999999999999999.99,Largest\n";
        let out = items(FileKind::Csv, huge);
        assert!(out[0].as_ref().unwrap_err().reason.contains("exceeds the supported range"));
        assert!(out[1].is_err());
        assert!(out[2].is_ok());
        let third = out[2].as_ref().unwrap();
        assert_eq!(third.source_kind, SourceKind::CsvRow);
        assert_eq!(
            third.structured_fields.as_ref().unwrap()["Description"],
            "Tea"
        );
    }

    #[test]
    fn test_identical_rows_get_distinct_stable_fingerprints() {
        let csv = "Date,Amount,Description\n2025-01-15,5.00,Tea\n2025-01-15,5.00,Tea\n";
        let first: Vec<_> = items(FileKind::Csv, csv).into_iter().map(|r| r.unwrap().fingerprint).collect();
        let second: Vec<_> = items(FileKind::Csv, csv).into_iter().map(|r| r.unwrap().fingerprint).collect();
        assert_ne!(first[0], first[1]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_iter_is_restartable() {
        let parsed = normalize_file("u1", FileKind::Txt, "line one 5\nline two 6\n", imported()).unwrap();
        assert_eq!(parsed.iter().count(), 2);
        assert_eq!(parsed.iter().count(), 2);
    }

    #[test]
    fn test_json_shapes() {
        let array = r#"[{"date":"2025-01-15","amount":500,"merchant":"Amazon"}, 5]"#;
        let out = items(FileKind::Json, array);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_ref().unwrap().structured_fields.as_ref().unwrap()["amount"],
            "500"
        );
        assert!(out[1].is_err());

        let wrapped = r#"{"transactions":[{"date":"2025-01-15","amount":"1.00"}]}"#;
        assert_eq!(items(FileKind::Json, wrapped).len(), 1);

        let single = r#"{"date":"2025-01-15","amount":"1.00"}"#;
        assert_eq!(items(FileKind::Json, single).len(), 1);

        let tagged = r#"{"amount":"10","merchant":"Cafe","tags":[]}"#;
        let out = items(FileKind::Json, tagged);
        assert_eq!(out.len(), 1);
        let fields = out[0].as_ref().unwrap().structured_fields.as_ref().unwrap();
        assert_eq!(fields["amount"], "10");
        assert_eq!(fields["merchant"], "Cafe");

        let labelled = r#"{"amount":"10","labels":["food","cafe"]}"#;
        assert_eq!(items(FileKind::Json, labelled).len(), 1);

        let custom = r#"{"export":"v2","history":[{"amount":"3.00"},{"amount":"4.00"}]}"#;
        assert_eq!(items(FileKind::Json, custom).len(), 2);

        let empty_wrapper = r#"{"transactions":[]}"#;
        assert!(items(FileKind::Json, empty_wrapper).is_empty());

        assert!(normalize_file("u1", FileKind::Json, "not json", imported()).is_err());
    }

    #[test]
    fn test_xml_child_records() {
        let xml = r#"<?xml version="1.0"?>
<transactions>
  <transaction><date>2025-01-15</date><amount>500.00</amount><description>Amazon &amp; Co</description></transaction>
  <transaction><date>2025-01-16</date><amount>20</amount><description>Tea</description></transaction>
</transactions>"#;
        let out = items(FileKind::Xml, xml);
        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.source_kind, SourceKind::XmlNode);
        assert_eq!(
            first.structured_fields.as_ref().unwrap()["description"],
            "Amazon & Co"
        );
    }

    #[test]
    fn test_xml_sms_backup_records_are_messages() {
        let xml = r#"<smses count="2">
  <sms address="VM-HDFCBK" date="1736937000000" type="1" body="Rs.250 debited from A/c XX1234 to ZOMATO" />
  <sms address="VM-OFFERS" date="1736937060000" type="1" body="Flat 50% off today" />
</smses>"#;
        let out = items(FileKind::Xml, xml);
        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert!(first.is_free_text());
        assert_eq!(first.raw_text, "Rs.250 debited from A/c XX1234 to ZOMATO");
        assert_eq!(first.sender.as_deref(), Some("VM-HDFCBK"));
        assert_eq!(first.received_at.to_rfc3339(), "2025-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_txt_delimited_and_free_text() {
        let table = "Date|Amount|Description\n2025-01-15|10.00|Tea\n";
        let out = items(FileKind::Txt, table);
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap().structured_fields.is_some());

        let lines = "Rs 500 debited from a/c XX1\n\nYour OTP is 1234\n";
        let out = items(FileKind::Txt, lines);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.as_ref().unwrap().is_free_text()));
        assert_eq!(out[0].as_ref().unwrap().source_kind, SourceKind::TxtLine);
    }

    #[test]
    fn test_base64_content_is_decoded() {
        let plain = "Date,Amount,Description\n2025-01-15,500.00,Amazon\n";
        let encoded = BASE64.encode(plain);
        assert_eq!(decode_content(&encoded), (plain.to_string(), true));
        assert_eq!(items(FileKind::Csv, &encoded).len(), 1);

        let (text, was_base64) = decode_content(plain);
        assert!(!was_base64);
        assert_eq!(text, plain);
    }

    #[test]
    fn test_validate_backup() {
        let ok = validate_backup("csv", "Date,Amount\n2025-01-01,1\n").unwrap();
        assert_eq!(ok.file_kind, FileKind::Csv);
        assert!(!ok.was_base64);

        assert!(matches!(
            validate_backup("pdf", "x"),
            Err(Error::UnsupportedFileKind(_))
        ));
        assert!(matches!(validate_backup("txt", "  \n"), Err(Error::InvalidData(_))));
        assert!(matches!(
            validate_backup("txt", &BASE64.encode("   ")),
            Err(Error::InvalidData(_))
        ));
    }
}
