//! AI backend response types
//!
//! These types are backend-agnostic and used across all AI implementations.
//! Every field is optional on the wire: models routinely omit keys or send
//! `null`, and the extractor decides what is usable.

use serde::{Deserialize, Serialize};

/// Combined classification + extraction answer for one free-text message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiExtraction {
    #[serde(default, alias = "is_transactional")]
    pub is_transaction: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    /// credit | debit | payment | spent | received | transfer
    #[serde(default)]
    pub transaction_type: Option<String>,
    /// Number or numeric string
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    /// ISO-8601, with or without offset
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub is_failed: Option<bool>,
}

impl AiExtraction {
    /// A "not a transaction" answer
    pub fn non_transaction(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            is_transaction: false,
            confidence: Some(confidence),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Debit/credit decision for an ambiguous statement row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionResolution {
    /// debit | credit | unknown
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}
