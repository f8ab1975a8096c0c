//! Transaction export to CSV and JSON

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{Database, SortField, SortOrder, TransactionFilter};
use crate::error::{Error, Result};
use crate::models::Transaction;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "pdf" | "xlsx" | "excel" => Err(format!("{} export is not supported", s)),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Options for transaction export
#[derive(Debug, Clone, Default)]
pub struct TransactionExportOptions {
    /// Start date filter (inclusive)
    pub from: Option<NaiveDate>,
    /// End date filter (inclusive)
    pub to: Option<NaiveDate>,
}

/// One exported transaction row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionExport {
    pub id: i64,
    pub date: String,
    pub amount: String,
    pub direction: String,
    pub merchant: String,
    pub category: String,
    pub payment_mode: String,
    pub reference_number: String,
    pub account_hint: String,
    pub remarks: String,
    pub failed: bool,
    pub recurring_group_id: String,
    pub extraction_method: String,
}

impl From<&Transaction> for TransactionExport {
    fn from(tx: &Transaction) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            id: tx.id,
            date: tx.ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            amount: format!("{:.2}", tx.amount),
            direction: tx.direction.as_str().to_string(),
            merchant: text(&tx.merchant),
            category: tx.category.clone(),
            payment_mode: text(&tx.payment_mode),
            reference_number: text(&tx.reference_number),
            account_hint: text(&tx.account_hint),
            remarks: text(&tx.remarks),
            failed: tx.failed,
            recurring_group_id: text(&tx.recurring_group_id),
            extraction_method: tx.extraction_method.as_str().to_string(),
        }
    }
}

impl Database {
    /// Transactions to export, oldest first
    pub fn export_transactions(
        &self,
        owner_id: &str,
        opts: &TransactionExportOptions,
    ) -> Result<Vec<TransactionExport>> {
        let filter = TransactionFilter::new()
            .date_range(opts.from, opts.to)
            .sort(SortField::Timestamp, SortOrder::Asc);
        let transactions = self.list_by_owner(owner_id, &filter)?;
        Ok(transactions.iter().map(TransactionExport::from).collect())
    }

    /// Export transactions to CSV format
    pub fn export_transactions_csv(
        &self,
        owner_id: &str,
        opts: &TransactionExportOptions,
    ) -> Result<String> {
        let rows = self.export_transactions(owner_id, opts)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        if rows.is_empty() {
            // serde only writes the header alongside the first record
            writer.write_record([
                "id",
                "date",
                "amount",
                "direction",
                "merchant",
                "category",
                "payment_mode",
                "reference_number",
                "account_hint",
                "remarks",
                "failed",
                "recurring_group_id",
                "extraction_method",
            ])?;
        }
        for row in &rows {
            writer.serialize(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidData(e.to_string()))
    }

    /// Export transactions as a pretty-printed JSON array
    pub fn export_transactions_json(
        &self,
        owner_id: &str,
        opts: &TransactionExportOptions,
    ) -> Result<String> {
        let rows = self.export_transactions(owner_id, opts)?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    pub fn export(
        &self,
        owner_id: &str,
        format: ExportFormat,
        opts: &TransactionExportOptions,
    ) -> Result<String> {
        match format {
            ExportFormat::Csv => self.export_transactions_csv(owner_id, opts),
            ExportFormat::Json => self.export_transactions_json(owner_id, opts),
        }
    }
}
