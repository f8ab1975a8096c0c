//! Transaction extraction
//!
//! Three sources of fields:
//! - the AI answer obtained during classification (free text)
//! - structured file rows, mapped locally through the field synonym table
//! - best-effort regex extraction when the AI is unavailable
//!
//! Local extraction never errors for odd input; missing data becomes `None`.
//! The only failure is a missing amount.

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::adapter::{resolve_fields, ResolvedRow};
use crate::ai::AiExtraction;
use crate::classify::{CallMode, ClassificationOutcome, Classifier};
use crate::models::{
    ClassificationResult, Direction, ExtractedTransaction, ExtractionFailure, ExtractionMethod,
    RawItem,
};

pub const NO_AMOUNT: &str = "no amount found";

/// What the extractor made of one raw item
#[derive(Debug, Clone)]
pub enum ItemExtraction {
    /// Free text judged non-transactional; nothing to store
    NotTransactional(ClassificationOutcome),
    Extracted {
        transaction: ExtractedTransaction,
        /// Present for free text only
        classification: Option<ClassificationResult>,
    },
    Failed(ExtractionFailure),
}

/// Run classification (free text) and extraction for one raw item
pub async fn extract_item(classifier: &Classifier, item: &RawItem, mode: CallMode) -> ItemExtraction {
    match item.structured_fields {
        Some(ref fields) => {
            let row = match resolve_fields(fields) {
                Ok(row) => row,
                Err(reason) => return ItemExtraction::Failed(ExtractionFailure::new(reason)),
            };
            match extract_structured(classifier, &row, item.received_at, mode).await {
                Ok(transaction) => ItemExtraction::Extracted {
                    transaction,
                    classification: None,
                },
                Err(failure) => ItemExtraction::Failed(failure),
            }
        }
        None => {
            let outcome = classifier
                .classify(&item.raw_text, item.sender.as_deref(), mode)
                .await;
            if !outcome.result.is_transactional {
                return ItemExtraction::NotTransactional(outcome);
            }

            let extracted = match outcome.ai_response {
                Some(ref ai) => from_ai_response(ai, &item.raw_text, item.received_at),
                None => extract_free_text(&item.raw_text, item.received_at),
            };

            match extracted {
                Ok(transaction) => ItemExtraction::Extracted {
                    transaction,
                    classification: Some(outcome.result),
                },
                Err(failure) => ItemExtraction::Failed(failure),
            }
        }
    }
}

/// Map a structured row; asks the AI only when the direction is unclear
pub async fn extract_structured(
    classifier: &Classifier,
    row: &ResolvedRow,
    received_at: DateTime<Utc>,
    mode: CallMode,
) -> Result<ExtractedTransaction, ExtractionFailure> {
    let mut tx = map_structured_row(row, received_at)?;
    if tx.direction.is_known() {
        return Ok(tx);
    }

    let description = row.description.as_deref().unwrap_or("");
    let amount = format!("{:.2}", tx.amount);
    if let Some(resolution) = classifier
        .resolve_direction(description, row.type_text.as_deref(), &amount, mode)
        .await
    {
        let direction = resolution
            .direction
            .as_deref()
            .map(direction_from_type)
            .unwrap_or_default();
        if direction.is_known() {
            debug!(%direction, description, "AI resolved row direction");
            tx.direction = direction;
            tx.extraction_method = ExtractionMethod::Ai;
            tx.confidence = resolution.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
            if tx.merchant.is_none() {
                tx.merchant = clean_text(resolution.merchant);
            }
            return Ok(tx);
        }
    }

    let context = format!(
        "{} {}",
        description,
        row.remarks.as_deref().unwrap_or_default()
    );
    tx.direction = infer_direction(&context);
    Ok(tx)
}

/// Pure mapping of a structured row (confidence 1.0, method fallback)
pub fn map_structured_row(
    row: &ResolvedRow,
    received_at: DateTime<Utc>,
) -> Result<ExtractedTransaction, ExtractionFailure> {
    let non_zero = |d: Option<Decimal>| d.filter(|v| !v.is_zero());

    let (amount, column_direction) = match (
        row.amount,
        non_zero(row.debit_amount),
        non_zero(row.credit_amount),
    ) {
        (Some(a), _, _) if a.is_sign_negative() => (a.abs(), Direction::Debit),
        (Some(a), _, _) => (a, Direction::Unknown),
        (None, Some(d), _) => (d.abs(), Direction::Debit),
        (None, None, Some(c)) => (c.abs(), Direction::Credit),
        (None, None, None) => return Err(ExtractionFailure::new(NO_AMOUNT)),
    };

    let type_direction = row
        .type_text
        .as_deref()
        .map(direction_from_type)
        .unwrap_or_default();

    let direction = if type_direction.is_known() {
        type_direction
    } else {
        column_direction
    };

    // A type column that is not a direction word is usually a category
    let type_category = match row.type_text.as_deref() {
        Some(t) if !type_direction.is_known() => Some(t.to_lowercase()),
        _ => None,
    };
    let category_hint =
        clean_text(row.category.as_deref().map(str::to_lowercase)).or(clean_text(type_category));

    Ok(ExtractedTransaction {
        amount,
        direction,
        merchant: clean_text(row.description.clone()),
        occurred_at: Some(row.date.unwrap_or(received_at)),
        reference_number: clean_text(row.reference.clone()),
        account_hint: None,
        payment_mode: row.mode.as_deref().and_then(normalize_payment_mode),
        bank_hint: None,
        remarks: clean_text(row.remarks.clone()),
        category_hint,
        failed: false,
        confidence: 1.0,
        extraction_method: ExtractionMethod::Fallback,
    })
}

/// Build an extraction from the AI's combined answer
///
/// Missing pieces are filled from the message text where possible.
pub fn from_ai_response(
    ai: &AiExtraction,
    text: &str,
    received_at: DateTime<Utc>,
) -> Result<ExtractedTransaction, ExtractionFailure> {
    let amount = ai
        .amount
        .as_ref()
        .and_then(amount_from_json)
        .map(|a| a.abs())
        .filter(|a| !a.is_zero())
        .or_else(|| find_amount(text))
        .ok_or_else(|| ExtractionFailure::new(NO_AMOUNT))?;

    let mut direction = ai
        .transaction_type
        .as_deref()
        .map(direction_from_type)
        .unwrap_or_default();
    if !direction.is_known() {
        direction = infer_direction(text);
    }

    let occurred_at = ai
        .transaction_date
        .as_deref()
        .and_then(parse_datetime)
        .unwrap_or(received_at);

    let account_hint = ai
        .account_number
        .as_deref()
        .or(ai.card_number.as_deref())
        .and_then(mask_account);

    Ok(ExtractedTransaction {
        amount,
        direction,
        merchant: clean_text(ai.merchant.clone()),
        occurred_at: Some(occurred_at),
        reference_number: clean_text(ai.reference_number.clone()),
        account_hint,
        payment_mode: ai.payment_method.as_deref().and_then(normalize_payment_mode),
        bank_hint: clean_text(ai.bank_name.clone()),
        remarks: clean_text(ai.remarks.clone()),
        category_hint: None,
        failed: ai.is_failed.unwrap_or(false),
        confidence: ai.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        extraction_method: ExtractionMethod::Ai,
    })
}

/// Best-effort regex extraction for free text
pub fn extract_free_text(
    text: &str,
    received_at: DateTime<Utc>,
) -> Result<ExtractedTransaction, ExtractionFailure> {
    let amount = find_amount(text).ok_or_else(|| ExtractionFailure::new(NO_AMOUNT))?;
    let p = patterns();

    let direction = infer_direction(text);
    let merchant = find_merchant(text);
    let reference_number = p
        .reference
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let account_hint = p
        .account
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| mask_account(m.as_str()));
    let bank_hint = p
        .bank
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|name| !matches!(name.to_lowercase().as_str(), "your" | "the" | "credit" | "debit" | "savings" | "net"))
        .map(|name| format!("{} Bank", name));

    let occurred_at = p
        .date
        .find_iter(text)
        .find_map(|m| parse_date(m.as_str()))
        .map(|date| {
            if date == received_at.date_naive() {
                received_at
            } else {
                Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
            }
        })
        .unwrap_or(received_at);

    let mut confidence: f64 = 0.4;
    if direction.is_known() {
        confidence += 0.15;
    }
    if merchant.is_some() {
        confidence += 0.15;
    }
    if reference_number.is_some() {
        confidence += 0.1;
    }

    Ok(ExtractedTransaction {
        amount,
        direction,
        merchant,
        occurred_at: Some(occurred_at),
        reference_number,
        account_hint,
        payment_mode: find_payment_mode(text),
        bank_hint,
        remarks: None,
        category_hint: None,
        failed: p.failed.is_match(text),
        confidence: confidence.min(0.8),
        extraction_method: ExtractionMethod::Fallback,
    })
}

struct Patterns {
    currency_amount: Regex,
    decimal_amount: Regex,
    verb_amount: Regex,
    debit_verb: Regex,
    credit_verb: Regex,
    credit_card: Regex,
    reference: Regex,
    account: Regex,
    bank: Regex,
    merchant_lead: Regex,
    vpa: Regex,
    date: Regex,
    failed: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        currency_amount: Regex::new(
            r"(?i)(?:₹|\brs\.?|\binr|\busd|\$|€|\beur|£)\s*([0-9][0-9,]*(?:\.[0-9]+)?)",
        )
        .expect("valid regex"),
        decimal_amount: Regex::new(r"\b([0-9][0-9,]*\.[0-9]{1,2})\b").expect("valid regex"),
        verb_amount: Regex::new(
            r"(?i)\b(?:debited|credited|paid|spent|sent|received|withdrawn|deposited|transferred|charged|refunded)\s+(?:(?:by|of|for|with)\s+)?([0-9][0-9,]*(?:\.[0-9]+)?)\b",
        )
        .expect("valid regex"),
        debit_verb: Regex::new(
            r"(?i)\b(?:debited|debit|spent|paid|sent|withdrawn|withdrawal|purchase|charged|dr)\b",
        )
        .expect("valid regex"),
        credit_verb: Regex::new(
            r"(?i)\b(?:credited|credit|received|deposited|deposit|refund|refunded|cashback|cr)\b",
        )
        .expect("valid regex"),
        credit_card: Regex::new(r"(?i)\bcredit\s+card\b").expect("valid regex"),
        reference: Regex::new(
            r"(?i)\b(?:utr|ref|reference|txn|transaction)(?:\s*(?:no|num|number|id|ref))?\.?\s*[:#-]?\s*([A-Za-z0-9]*[0-9][A-Za-z0-9]{5,})",
        )
        .expect("valid regex"),
        account: Regex::new(
            r"(?i)\b(?:a/?c|acct|account|card)(?:\s*(?:no\.?|number|ending(?:\s+with)?))?\s*[:#]?\s*(?:[x*]+\s*)?([0-9]{3,6})\b",
        )
        .expect("valid regex"),
        bank: Regex::new(r"(?i)\b([a-z]{2,15})\s+bank\b").expect("valid regex"),
        merchant_lead: Regex::new(r"(?i)\b(?:at|to|towards|from|vpa)\s+").expect("valid regex"),
        vpa: Regex::new(r"\b([A-Za-z0-9._-]+@[A-Za-z]{2,})\b").expect("valid regex"),
        date: Regex::new(
            r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[-/](?:\d{1,2}|[A-Za-z]{3})[-/]\d{2,4})\b",
        )
        .expect("valid regex"),
        failed: Regex::new(r"(?i)\b(?:failed|declined|unsuccessful|reversed|rejected)\b")
            .expect("valid regex"),
    })
}

/// First currency-marked amount, then first decimal number, then a number after a verb
pub fn find_amount(text: &str) -> Option<Decimal> {
    let p = patterns();
    [&p.currency_amount, &p.decimal_amount, &p.verb_amount]
        .iter()
        .find_map(|re| {
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .filter_map(|m| parse_amount(m.as_str()))
                .find(|a| !a.is_zero())
        })
        .map(|a| a.abs())
}

/// Direction from whichever debit/credit verb appears first
pub fn infer_direction(text: &str) -> Direction {
    let p = patterns();
    // "credit card" names an instrument, not a direction
    let text = p.credit_card.replace_all(text, "card");

    let debit = p.debit_verb.find(&text).map(|m| m.start());
    let credit = p.credit_verb.find(&text).map(|m| m.start());

    match (debit, credit) {
        (Some(d), Some(c)) if d <= c => Direction::Debit,
        (Some(_), Some(_)) => Direction::Credit,
        (Some(_), None) => Direction::Debit,
        (None, Some(_)) => Direction::Credit,
        (None, None) => Direction::Unknown,
    }
}

/// Map a type/category word to a direction
pub fn direction_from_type(value: &str) -> Direction {
    match value.trim().to_lowercase().as_str() {
        "debit" | "dr" | "d" | "withdrawal" | "purchase" | "payment" | "spent" | "sent" | "paid"
        | "expense" | "outflow" => Direction::Debit,
        "credit" | "cr" | "c" | "deposit" | "refund" | "received" | "income" | "inflow" => {
            Direction::Credit
        }
        _ => Direction::Unknown,
    }
}

fn find_merchant(text: &str) -> Option<String> {
    const STOP_WORDS: &[&str] = &[
        "on", "via", "ref", "upi", "for", "with", "using", "avl", "avbl", "bal", "is", "txn",
        "if", "not", "call", "and", "dated", "info", "from", "at", "to", "failed", "declined",
    ];
    const REJECT_PREFIXES: &[&str] = &[
        "your", "a/c", "ac ", "acct", "account", "rs", "inr", "card", "you", "us ", "bank",
    ];

    let p = patterns();
    let candidate = p
        .merchant_lead
        .find_iter(text)
        .filter_map(|lead| {
            let segment = text[lead.end()..]
                .split(['.', ',', ';', ':', '\n'])
                .next()
                .unwrap_or_default();
            let words: Vec<&str> = segment
                .split_whitespace()
                .take_while(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
                .collect();
            let name = words.join(" ");
            let lower = name.to_lowercase();
            let usable = !name.is_empty()
                && name.len() <= 40
                && !REJECT_PREFIXES.iter().any(|p| lower.starts_with(p))
                && !name.chars().all(|c| c.is_ascii_digit());
            usable.then_some(name)
        })
        .next();

    candidate.or_else(|| {
        p.vpa
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn find_payment_mode(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let has = |word: &str| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == word)
    };

    let mode = if has("upi") || lower.contains("@ok") || lower.contains("vpa") {
        Some("upi")
    } else if has("imps") {
        Some("imps")
    } else if has("neft") {
        Some("neft")
    } else if has("rtgs") {
        Some("rtgs")
    } else if lower.contains("netbanking") || lower.contains("net banking") {
        Some("netbanking")
    } else if has("wallet") {
        Some("wallet")
    } else if has("atm") || has("cash") {
        Some("cash")
    } else if has("card") || has("pos") {
        Some("card")
    } else {
        None
    };
    mode.map(str::to_string)
}

/// Canonical payment mode name, or None for blanks
pub fn normalize_payment_mode(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() || lower == "null" {
        return None;
    }
    let canonical = match lower.as_str() {
        "upi" | "gpay" | "phonepe" | "bhim" => "upi",
        "card" | "debit card" | "credit card" | "debit_card" | "credit_card" | "pos" => "card",
        "neft" => "neft",
        "imps" => "imps",
        "rtgs" => "rtgs",
        "cash" | "atm" => "cash",
        "wallet" | "paytm" => "wallet",
        "netbanking" | "net banking" | "net_banking" | "internet banking" => "netbanking",
        other => other,
    };
    Some(canonical.to_string())
}

/// Mask an account or card number to "XX" + last four digits
pub fn mask_account(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 3 {
        return None;
    }
    let tail = &digits[digits.len().saturating_sub(4)..];
    Some(format!("XX{}", tail))
}

/// Largest accepted amount magnitude: 15 integer digits, 999999999999999.99
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_569_325_055, 23_283_064, 0, false, 2);

/// Whether an amount's magnitude is within [`MAX_AMOUNT`]
pub fn amount_in_range(value: Decimal) -> bool {
    value.abs() <= MAX_AMOUNT
}

/// Parse a money amount, keeping its sign
///
/// Accepts thousands separators, currency markers on either side, a leading
/// minus, and accounting parentheses. Amounts beyond [`MAX_AMOUNT`] are
/// rejected.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    parse_amount_unbounded(raw).filter(|v| amount_in_range(*v))
}

pub(crate) fn parse_amount_unbounded(raw: &str) -> Option<Decimal> {
    let mut s = raw.trim();
    let mut negative = false;

    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim();
    }
    s = strip_currency(s);
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim();
    }

    let cleaned: String = s
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value } else { value })
}

fn strip_currency(s: &str) -> &str {
    const MARKERS: &[&str] = &["INR", "RS.", "RS", "USD", "EUR", "GBP", "₹", "$", "€", "£"];

    let mut s = s.trim();
    for marker in MARKERS {
        if let Some(head) = s.get(..marker.len()) {
            if head.eq_ignore_ascii_case(marker) {
                s = s[marker.len()..].trim_start();
                break;
            }
        }
    }
    for marker in MARKERS {
        if s.len() >= marker.len() {
            let split = s.len() - marker.len();
            if let Some(tail) = s.get(split..) {
                if tail.eq_ignore_ascii_case(marker) {
                    s = s[..split].trim_end();
                    break;
                }
            }
        }
    }
    s
}

fn amount_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok()))
            .filter(|v| amount_in_range(*v)),
        serde_json::Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Parse a timestamp in any of the accepted formats
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%d-%m-%Y %H:%M:%S",
        "%d-%m-%Y %H:%M",
    ];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Epoch milliseconds (SMS backup apps) or seconds
    if raw.len() >= 10 && raw.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = raw.parse().ok()?;
        return if raw.len() >= 13 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    parse_date(raw).map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

/// Parse a calendar date; day-first formats win over month-first
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d/%m/%Y",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%d/%m/%y",
        "%d-%m-%y",
        "%d-%b-%Y",
        "%d-%b-%y",
        "%d %b %Y",
        "%d %b %y",
        "%b %d, %Y",
        "%m/%d/%Y",
    ];

    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .find(|d| d.year() >= 1900)
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .filter(|v| !matches!(v.to_lowercase().as_str(), "null" | "none" | "n/a" | "unknown"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::ai::MockBackend;
    use crate::config::AiConfig;
    use crate::models::SourceKind;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("500.00"), Some(dec("500.00")));
        assert_eq!(parse_amount("1,23,456.50"), Some(dec("123456.50")));
        assert_eq!(parse_amount("₹ 2,000"), Some(dec("2000")));
        assert_eq!(parse_amount("Rs. 45.5"), Some(dec("45.5")));
        assert_eq!(parse_amount("INR1500"), Some(dec("1500")));
        assert_eq!(parse_amount("$12.99"), Some(dec("12.99")));
        assert_eq!(parse_amount("12.99 USD"), Some(dec("12.99")));
        assert_eq!(parse_amount("-75.25"), Some(dec("-75.25")));
        assert_eq!(parse_amount("(1,000.00)"), Some(dec("-1000.00")));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("12.3.4"), None);
    }

    #[test]
    fn test_parse_amount_rejects_oversized_values() {
        assert_eq!(parse_amount("999999999999999.99"), Some(dec("999999999999999.99")));
        assert_eq!(parse_amount("1000000000000000.00"), None);
        assert_eq!(parse_amount("50000000000000000000000000000"), None);
        assert!(parse_amount_unbounded("50000000000000000000000000000").is_some());
        assert!(amount_in_range(-MAX_AMOUNT));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(parse_date("2025-03-05"), Some(expected));
        assert_eq!(parse_date("05/03/2025"), Some(expected));
        assert_eq!(parse_date("05-03-25"), Some(expected));
        assert_eq!(parse_date("05-Mar-2025"), Some(expected));
        assert_eq!(parse_date("5 Mar 2025"), Some(expected));
        // Month-first only when day-first is impossible
        assert_eq!(parse_date("12/25/2024"), NaiveDate::from_ymd_opt(2024, 12, 25));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert_eq!(
            parse_datetime("2025-01-15T10:30:00+05:30"),
            Some(at("2025-01-15T05:00:00Z"))
        );
        assert_eq!(
            parse_datetime("2025-01-15 10:30:00"),
            Some(at("2025-01-15T10:30:00Z"))
        );
        assert_eq!(parse_datetime("2025-01-15"), Some(at("2025-01-15T00:00:00Z")));
        assert_eq!(
            parse_datetime("1736937000000"),
            Some(at("2025-01-15T10:30:00Z"))
        );
    }

    #[test]
    fn test_infer_direction() {
        assert_eq!(infer_direction("Rs 500 debited from A/c"), Direction::Debit);
        assert_eq!(infer_direction("INR 900 credited to your a/c"), Direction::Credit);
        assert_eq!(
            infer_direction("Rs 99 spent on your ICICI Bank Credit Card"),
            Direction::Debit
        );
        assert_eq!(
            infer_direction("Rs 500 debited from a/c XX12 and credited to VPA x@ybl"),
            Direction::Debit
        );
        assert_eq!(infer_direction("Balance is Rs 4,000"), Direction::Unknown);
    }

    #[test]
    fn test_extract_free_text_upi_debit() {
        let received = at("2025-03-05T09:15:00Z");
        let text = "Rs.499.00 debited from A/c XX4321 to NETFLIX on 05-03-25. UPI Ref 512345678901";
        let tx = extract_free_text(text, received).unwrap();

        assert_eq!(tx.amount, dec("499.00"));
        assert_eq!(tx.direction, Direction::Debit);
        assert_eq!(tx.merchant.as_deref(), Some("NETFLIX"));
        assert_eq!(tx.reference_number.as_deref(), Some("512345678901"));
        assert_eq!(tx.account_hint.as_deref(), Some("XX4321"));
        assert_eq!(tx.payment_mode.as_deref(), Some("upi"));
        assert_eq!(tx.occurred_at, Some(received));
        assert_eq!(tx.extraction_method, ExtractionMethod::Fallback);
        assert!(!tx.failed);
    }

    #[test]
    fn test_extract_free_text_card_spend_and_bank() {
        let received = at("2025-02-01T12:00:00Z");
        let text = "INR 1,250.00 spent on HDFC Bank Card XX9876 at AMAZON PAY INDIA on 2025-01-31";
        let tx = extract_free_text(text, received).unwrap();

        assert_eq!(tx.amount, dec("1250.00"));
        assert_eq!(tx.merchant.as_deref(), Some("AMAZON PAY INDIA"));
        assert_eq!(tx.bank_hint.as_deref(), Some("HDFC Bank"));
        assert_eq!(tx.occurred_at, Some(at("2025-01-31T00:00:00Z")));
        assert_eq!(tx.payment_mode.as_deref(), Some("card"));
    }

    #[test]
    fn test_extract_free_text_without_amount_fails() {
        let err = extract_free_text("Your account was credited", Utc::now()).unwrap_err();
        assert_eq!(err.reason, NO_AMOUNT);
    }

    #[test]
    fn test_extract_free_text_flags_failed_transactions() {
        let tx = extract_free_text("Transaction of Rs 300 at ZOMATO failed", Utc::now()).unwrap();
        assert!(tx.failed);
        assert_eq!(tx.merchant.as_deref(), Some("ZOMATO"));
    }

    #[test]
    fn test_from_ai_response_maps_fields() {
        let received = at("2025-01-10T08:00:00Z");
        let ai = AiExtraction {
            is_transaction: true,
            confidence: Some(0.92),
            transaction_type: Some("received".into()),
            amount: Some(serde_json::json!(2500)),
            merchant: Some("John".into()),
            transaction_date: Some("2025-01-09T18:20:00".into()),
            account_number: Some("001234567890".into()),
            payment_method: Some("IMPS".into()),
            is_failed: Some(false),
            ..Default::default()
        };

        let tx = from_ai_response(&ai, "irrelevant", received).unwrap();
        assert_eq!(tx.amount, dec("2500"));
        assert_eq!(tx.direction, Direction::Credit);
        assert_eq!(tx.occurred_at, Some(at("2025-01-09T18:20:00Z")));
        assert_eq!(tx.account_hint.as_deref(), Some("XX7890"));
        assert_eq!(tx.payment_mode.as_deref(), Some("imps"));
        assert_eq!(tx.extraction_method, ExtractionMethod::Ai);
        assert_eq!(tx.confidence, 0.92);
    }

    #[test]
    fn test_from_ai_response_transfer_falls_back_to_text_verbs() {
        let ai = AiExtraction {
            is_transaction: true,
            transaction_type: Some("transfer".into()),
            amount: Some(serde_json::json!("₹1,000")),
            merchant: Some("null".into()),
            ..Default::default()
        };
        let tx = from_ai_response(&ai, "Rs 1000 sent to savings", Utc::now()).unwrap();
        assert_eq!(tx.amount, dec("1000"));
        assert_eq!(tx.direction, Direction::Debit);
        assert!(tx.merchant.is_none());
    }

    #[test]
    fn test_from_ai_response_without_any_amount_fails() {
        let ai = AiExtraction {
            is_transaction: true,
            ..Default::default()
        };
        assert!(from_ai_response(&ai, "money moved", Utc::now()).is_err());
    }

    fn row(pairs: &[(&str, &str)]) -> ResolvedRow {
        let fields: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        resolve_fields(&fields).unwrap()
    }

    #[test]
    fn test_map_structured_row() {
        let r = row(&[
            ("Date", "2025-01-15"),
            ("Amount", "500.00"),
            ("Description", "Amazon Purchase"),
            ("Type", "Debit"),
        ]);
        let tx = map_structured_row(&r, Utc::now()).unwrap();
        assert_eq!(tx.amount, dec("500.00"));
        assert_eq!(tx.direction, Direction::Debit);
        assert_eq!(tx.merchant.as_deref(), Some("Amazon Purchase"));
        assert_eq!(tx.occurred_at, Some(at("2025-01-15T00:00:00Z")));
        assert_eq!(tx.confidence, 1.0);
        assert_eq!(tx.extraction_method, ExtractionMethod::Fallback);
        assert!(tx.category_hint.is_none());
    }

    #[test]
    fn test_map_structured_row_sign_and_columns() {
        let negative = row(&[("Date", "2025-01-15"), ("Amount", "-42.10"), ("Narration", "CAFE")]);
        let tx = map_structured_row(&negative, Utc::now()).unwrap();
        assert_eq!(tx.amount, dec("42.10"));
        assert_eq!(tx.direction, Direction::Debit);

        let split = row(&[("Date", "2025-01-15"), ("Withdrawal", ""), ("Deposit", "900"), ("Particulars", "SALARY")]);
        let tx = map_structured_row(&split, Utc::now()).unwrap();
        assert_eq!(tx.direction, Direction::Credit);
        assert_eq!(tx.amount, dec("900"));

        let category = row(&[("Date", "2025-01-15"), ("Amount", "10"), ("Category", "Groceries")]);
        let tx = map_structured_row(&category, Utc::now()).unwrap();
        assert_eq!(tx.direction, Direction::Unknown);
        assert_eq!(tx.category_hint.as_deref(), Some("groceries"));

        let empty = row(&[("Date", "2025-01-15"), ("Description", "??")]);
        assert_eq!(map_structured_row(&empty, Utc::now()).unwrap_err().reason, NO_AMOUNT);
    }

    #[tokio::test]
    async fn test_structured_row_asks_ai_only_when_direction_unknown() {
        let mock = MockBackend::new().with_direction("ACME", Direction::Credit);
        let classifier = Classifier::new(Some(mock.clone().into()), AiConfig::default());

        let known = row(&[("Date", "2025-01-15"), ("Amount", "10"), ("Type", "credit"), ("Description", "ACME")]);
        let tx = extract_structured(&classifier, &known, Utc::now(), CallMode::Batch).await.unwrap();
        assert_eq!(tx.direction, Direction::Credit);
        assert_eq!(mock.call_count(), 0);

        let unknown = row(&[("Date", "2025-01-15"), ("Amount", "10"), ("Description", "ACME PAYOUT")]);
        let tx = extract_structured(&classifier, &unknown, Utc::now(), CallMode::Batch).await.unwrap();
        assert_eq!(tx.direction, Direction::Credit);
        assert_eq!(tx.extraction_method, ExtractionMethod::Ai);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_extract_item_free_text_offline() {
        let classifier = Classifier::offline();
        let item = RawItem {
            source_kind: SourceKind::Sms,
            raw_text: "Your OTP is 123456".into(),
            structured_fields: None,
            received_at: Utc::now(),
            owner_id: "u1".into(),
            sender: None,
            fingerprint: "f".into(),
        };
        let result = extract_item(&classifier, &item, CallMode::Interactive).await;
        assert!(matches!(result, ItemExtraction::NotTransactional(_)));
    }
}
