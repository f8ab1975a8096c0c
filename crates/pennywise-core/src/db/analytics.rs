//! Per-owner analytics

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::transaction_filter::TransactionFilter;
use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    AnalyticsSummary, Direction, DirectionTotal, MonthlyTrend, NamedTotal, Transaction,
};

const TOP_N: usize = 10;

impl Database {
    /// Summarize an owner's transactions over an optional inclusive date range
    pub fn analytics_summary(
        &self,
        owner_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<AnalyticsSummary> {
        let filter = TransactionFilter::new().date_range(from, to);
        let transactions = self.list_by_owner(owner_id, &filter)?;
        summarize(&transactions, from, to)
    }
}

fn top_totals(map: HashMap<String, (i64, Decimal)>) -> Vec<NamedTotal> {
    let mut totals: Vec<NamedTotal> = map
        .into_iter()
        .map(|(name, (count, amount))| NamedTotal {
            name,
            count,
            amount,
        })
        .collect();
    totals.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.name.cmp(&b.name)));
    totals.truncate(TOP_N);
    totals
}

/// Add into a running total, failing instead of overflowing
fn accumulate(total: &mut Decimal, amount: Decimal) -> Result<()> {
    *total = total
        .checked_add(amount)
        .ok_or_else(|| Error::InvalidData("amount total overflow".into()))?;
    Ok(())
}

pub(crate) fn summarize(
    transactions: &[Transaction],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<AnalyticsSummary> {
    let mut total_amount = Decimal::ZERO;
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;
    let mut failed_count = 0;
    let mut recurring_count = 0;

    let mut by_direction: BTreeMap<&'static str, (Direction, i64, Decimal)> = BTreeMap::new();
    let mut merchants: HashMap<String, (i64, Decimal)> = HashMap::new();
    let mut categories: HashMap<String, (i64, Decimal)> = HashMap::new();
    let mut months: BTreeMap<String, MonthlyTrend> = BTreeMap::new();

    for tx in transactions {
        accumulate(&mut total_amount, tx.amount)?;
        match tx.direction {
            Direction::Debit => accumulate(&mut total_debit, tx.amount)?,
            Direction::Credit => accumulate(&mut total_credit, tx.amount)?,
            Direction::Unknown => {}
        }
        if tx.failed {
            failed_count += 1;
        }
        if tx.recurring_group_id.is_some() {
            recurring_count += 1;
        }

        let entry = by_direction
            .entry(tx.direction.as_str())
            .or_insert((tx.direction, 0, Decimal::ZERO));
        entry.1 += 1;
        accumulate(&mut entry.2, tx.amount)?;

        if let Some(merchant) = tx.merchant.as_deref().filter(|m| !m.is_empty()) {
            let entry = merchants
                .entry(merchant.to_string())
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            accumulate(&mut entry.1, tx.amount)?;
        }

        let entry = categories
            .entry(tx.category.clone())
            .or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        accumulate(&mut entry.1, tx.amount)?;

        let month = tx.ts.format("%Y-%m").to_string();
        let trend = months.entry(month.clone()).or_insert_with(|| MonthlyTrend {
            month,
            debit: Decimal::ZERO,
            credit: Decimal::ZERO,
            count: 0,
        });
        trend.count += 1;
        match tx.direction {
            Direction::Debit => accumulate(&mut trend.debit, tx.amount)?,
            Direction::Credit => accumulate(&mut trend.credit, tx.amount)?,
            Direction::Unknown => {}
        }
    }

    let total_count = transactions.len() as i64;
    let average_amount = if total_count > 0 {
        (total_amount / Decimal::from(total_count)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    Ok(AnalyticsSummary {
        from,
        to,
        total_count,
        total_amount,
        total_debit,
        total_credit,
        average_amount,
        by_direction: by_direction
            .into_values()
            .map(|(direction, count, amount)| DirectionTotal {
                direction,
                count,
                amount,
            })
            .collect(),
        top_merchants: top_totals(merchants),
        top_categories: top_totals(categories),
        monthly_trends: months.into_values().collect(),
        failed_count,
        recurring_count,
    })
}
