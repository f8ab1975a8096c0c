//! Transaction filter builder for constructing dynamic SQL queries
//!
//! Shared by `list_by_owner` and `count_by_owner` so both see the same
//! WHERE clause. The owner condition is always first.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::Direction;

/// Sort column for transaction listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Timestamp,
    Amount,
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ts" | "timestamp" | "date" => Ok(Self::Timestamp),
            "amount" => Ok(Self::Amount),
            _ => Err(format!("Unknown sort field: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

/// Builder for constructing transaction query filters
///
/// The lifetime `'query` covers the borrowed search strings.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter<'query> {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub direction: Option<Direction>,
    /// Case-insensitive substring
    pub merchant: Option<&'query str>,
    pub category: Option<&'query str>,
    pub payment_mode: Option<&'query str>,
    pub failed: Option<bool>,
    pub recurring_only: bool,
    pub limit: Option<i64>,
    pub offset: i64,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

/// Result of building a filter - contains SQL components and parameters
pub struct FilterResult {
    /// WHERE clause including "WHERE" keyword
    pub where_clause: String,
    /// ORDER BY clause including "ORDER BY" keyword
    pub order_clause: String,
    /// LIMIT/OFFSET clause, empty when unbounded
    pub limit_clause: String,
    /// Parameters for the query (boxed for rusqlite compatibility)
    pub params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl<'query> TransactionFilter<'query> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive date range on the transaction timestamp
    pub fn date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn amount_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }

    pub fn direction(mut self, direction: Option<Direction>) -> Self {
        self.direction = direction;
        self
    }

    pub fn merchant(mut self, merchant: Option<&'query str>) -> Self {
        self.merchant = merchant;
        self
    }

    pub fn category(mut self, category: Option<&'query str>) -> Self {
        self.category = category;
        self
    }

    pub fn payment_mode(mut self, mode: Option<&'query str>) -> Self {
        self.payment_mode = mode;
        self
    }

    pub fn failed(mut self, failed: Option<bool>) -> Self {
        self.failed = failed;
        self
    }

    pub fn recurring_only(mut self, value: bool) -> Self {
        self.recurring_only = value;
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    /// Build the filter components for one owner
    pub fn build(&self, owner_id: &str) -> FilterResult {
        let mut conditions = vec!["t.owner_id = ?".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id.to_string())];

        if let Some(from) = self.from {
            conditions.push("date(t.ts) >= ?".to_string());
            params.push(Box::new(from.to_string()));
        }
        if let Some(to) = self.to {
            conditions.push("date(t.ts) <= ?".to_string());
            params.push(Box::new(to.to_string()));
        }

        if let Some(min) = self.min_amount.and_then(|d| d.to_f64()) {
            conditions.push("CAST(t.amount AS REAL) >= ?".to_string());
            params.push(Box::new(min));
        }
        if let Some(max) = self.max_amount.and_then(|d| d.to_f64()) {
            conditions.push("CAST(t.amount AS REAL) <= ?".to_string());
            params.push(Box::new(max));
        }

        if let Some(direction) = self.direction {
            conditions.push("t.direction = ?".to_string());
            params.push(Box::new(direction.as_str()));
        }

        if let Some(merchant) = self.merchant.map(str::trim).filter(|m| !m.is_empty()) {
            conditions.push("t.merchant LIKE ? COLLATE NOCASE".to_string());
            params.push(Box::new(format!("%{}%", merchant)));
        }

        if let Some(category) = self.category.map(str::trim).filter(|c| !c.is_empty()) {
            conditions.push("t.category = ? COLLATE NOCASE".to_string());
            params.push(Box::new(category.to_string()));
        }

        if let Some(mode) = self.payment_mode.map(str::trim).filter(|m| !m.is_empty()) {
            conditions.push("t.payment_mode = ? COLLATE NOCASE".to_string());
            params.push(Box::new(mode.to_string()));
        }

        if let Some(failed) = self.failed {
            conditions.push("t.failed = ?".to_string());
            params.push(Box::new(failed));
        }

        if self.recurring_only {
            conditions.push("t.recurring_group_id IS NOT NULL".to_string());
        }

        let order_column = match self.sort_field {
            SortField::Amount => "CAST(t.amount AS REAL)",
            SortField::Timestamp => "t.ts",
        };
        let order_dir = match self.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let limit_clause = match self.limit {
            Some(limit) => format!("LIMIT {} OFFSET {}", limit.max(0), self.offset.max(0)),
            None if self.offset > 0 => format!("LIMIT -1 OFFSET {}", self.offset),
            None => String::new(),
        };

        FilterResult {
            where_clause: format!("WHERE {}", conditions.join(" AND ")),
            order_clause: format!("ORDER BY {} {}, t.id {}", order_column, order_dir, order_dir),
            limit_clause,
            params,
        }
    }
}

impl FilterResult {
    /// Build a COUNT query
    pub fn build_count_query(&self) -> String {
        format!("SELECT COUNT(*) FROM transactions t {}", self.where_clause)
    }

    /// Get parameter references for query execution
    pub fn params_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_condition_always_present() {
        let result = TransactionFilter::new().build("alice");
        assert_eq!(result.where_clause, "WHERE t.owner_id = ?");
        assert_eq!(result.params.len(), 1);
        assert!(result.limit_clause.is_empty());
        assert_eq!(result.order_clause, "ORDER BY t.ts DESC, t.id DESC");
    }

    #[test]
    fn test_all_conditions() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1);
        let to = NaiveDate::from_ymd_opt(2025, 1, 31);
        let result = TransactionFilter::new()
            .date_range(from, to)
            .amount_range(Some(Decimal::new(10, 0)), Some(Decimal::new(500, 0)))
            .direction(Some(Direction::Debit))
            .merchant(Some("net"))
            .category(Some("entertainment"))
            .payment_mode(Some("upi"))
            .failed(Some(false))
            .recurring_only(true)
            .limit(Some(20))
            .offset(40)
            .sort(SortField::Amount, SortOrder::Asc)
            .build("alice");

        assert_eq!(result.params.len(), 10);
        assert!(result.where_clause.contains("t.recurring_group_id IS NOT NULL"));
        assert!(result.where_clause.contains("t.merchant LIKE ?"));
        assert_eq!(result.limit_clause, "LIMIT 20 OFFSET 40");
        assert!(result.order_clause.starts_with("ORDER BY CAST(t.amount AS REAL) ASC"));
    }

    #[test]
    fn test_blank_strings_are_ignored() {
        let result = TransactionFilter::new()
            .merchant(Some("  "))
            .category(Some(""))
            .build("alice");
        assert_eq!(result.params.len(), 1);
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("amount".parse::<SortField>().unwrap(), SortField::Amount);
        assert_eq!("date".parse::<SortField>().unwrap(), SortField::Timestamp);
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
