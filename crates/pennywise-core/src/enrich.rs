//! Post-storage enrichment: recurring payment detection and category backfill
//!
//! Both passes read an owner's stored transactions and only add information:
//! group ids are assigned but never cleared, and categories are filled in
//! only where nothing (and nobody) has set one.

use std::collections::BTreeMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::categorize::CategoryTable;
use crate::config::RecurringConfig;
use crate::db::{Database, TransactionFilter};
use crate::error::Result;
use crate::models::{EditableField, EnrichmentReport, Transaction, UNCATEGORIZED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Weekly,
    Monthly,
    Yearly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    fn expected_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Yearly => 365,
        }
    }
}

/// A detected recurring payment
#[derive(Debug, Clone)]
pub struct RecurringGroup {
    pub group_id: String,
    pub merchant: String,
    pub cadence: Cadence,
    pub median_amount: Decimal,
    pub transaction_ids: Vec<i64>,
}

/// Stable group id: same merchant, amount and cadence always hash the same
pub fn recurring_group_id(merchant: &str, median_amount: Decimal, cadence: Cadence) -> String {
    let rounded = median_amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or_default();
    let signature = format!(
        "{}|{}|{}",
        merchant.trim().to_lowercase(),
        rounded,
        cadence.as_str()
    );
    let digest = hex::encode(Sha256::digest(signature.as_bytes()));
    digest[..16].to_string()
}

#[derive(Debug, Clone, Default)]
pub struct Enricher {
    categories: CategoryTable,
    config: RecurringConfig,
}

impl Enricher {
    pub fn new(categories: CategoryTable, config: RecurringConfig) -> Self {
        Self { categories, config }
    }

    /// Run both passes over an owner's transactions
    pub fn run(&self, db: &Database, owner_id: &str) -> Result<EnrichmentReport> {
        let transactions = db.list_by_owner(owner_id, &TransactionFilter::new())?;

        let groups = self.detect_recurring(&transactions);
        for group in &groups {
            let updated = db.set_recurring_group(&group.transaction_ids, &group.group_id)?;
            debug!(
                owner = owner_id,
                group = %group.group_id,
                merchant = %group.merchant,
                cadence = group.cadence.as_str(),
                members = group.transaction_ids.len(),
                updated,
                "Recurring group"
            );
        }

        let categorized = self.backfill_categories(db, &transactions)?;

        info!(
            owner = owner_id,
            recurring_groups = groups.len(),
            categorized,
            "Enrichment complete"
        );
        Ok(EnrichmentReport {
            recurring_groups_found: groups.len(),
            categorized,
        })
    }

    /// Find recurring groups among a set of transactions (no storage access)
    pub fn detect_recurring(&self, transactions: &[Transaction]) -> Vec<RecurringGroup> {
        let mut by_merchant: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
        for tx in transactions.iter().filter(|t| !t.failed) {
            if let Some(merchant) = tx.merchant.as_deref().map(str::trim).filter(|m| !m.is_empty())
            {
                by_merchant
                    .entry(merchant.to_lowercase())
                    .or_default()
                    .push(tx);
            }
        }

        let mut groups = Vec::new();
        for (merchant, txs) in by_merchant {
            for cluster in self.cluster_by_amount(txs) {
                if let Some(group) = self.recurring_pattern(&merchant, cluster) {
                    groups.push(group);
                }
            }
        }
        groups
    }

    /// Greedy clusters: each spans at most the tolerance above its smallest amount
    fn cluster_by_amount<'a>(&self, mut txs: Vec<&'a Transaction>) -> Vec<Vec<&'a Transaction>> {
        let tolerance = Decimal::from_f64(self.config.amount_tolerance).unwrap_or_default();
        txs.sort_by(|a, b| a.amount.cmp(&b.amount));

        let mut clusters: Vec<Vec<&Transaction>> = Vec::new();
        for tx in txs {
            match clusters.last_mut() {
                Some(cluster) if tx.amount <= cluster[0].amount * (Decimal::ONE + tolerance) => {
                    cluster.push(tx)
                }
                _ => clusters.push(vec![tx]),
            }
        }
        clusters
    }

    fn recurring_pattern(
        &self,
        merchant: &str,
        mut txs: Vec<&Transaction>,
    ) -> Option<RecurringGroup> {
        if txs.len() < self.config.min_occurrences.max(2) {
            return None;
        }
        txs.sort_by_key(|t| t.ts);

        let intervals: Vec<i64> = txs
            .windows(2)
            .map(|w| (w[1].ts - w[0].ts).num_days())
            .collect();
        let mean = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;

        let (cadence, tolerance) = if mean < 10.0 {
            (Cadence::Weekly, self.config.weekly_tolerance_days)
        } else if mean < 45.0 {
            (Cadence::Monthly, self.config.monthly_tolerance_days)
        } else if mean < 400.0 {
            (Cadence::Yearly, self.config.yearly_tolerance_days)
        } else {
            return None;
        };

        let regular = intervals
            .iter()
            .filter(|&&days| (days - cadence.expected_days()).abs() <= tolerance)
            .count();
        if (regular as f64 / intervals.len() as f64) < self.config.min_regular_ratio {
            return None;
        }

        let amounts: Vec<Decimal> = txs.iter().map(|t| t.amount).collect();
        let median_amount = median(&amounts);

        Some(RecurringGroup {
            group_id: recurring_group_id(merchant, median_amount, cadence),
            merchant: merchant.to_string(),
            cadence,
            median_amount,
            transaction_ids: txs.iter().map(|t| t.id).collect(),
        })
    }

    /// Re-apply the keyword table to uncategorized, non-user-set transactions
    pub fn backfill_categories(&self, db: &Database, transactions: &[Transaction]) -> Result<usize> {
        let mut categorized = 0;
        for tx in transactions {
            if tx.category != UNCATEGORIZED || tx.is_user_edited(EditableField::Category) {
                continue;
            }
            if let Some(category) = self
                .categories
                .lookup(tx.merchant.as_deref(), tx.remarks.as_deref())
            {
                db.set_category(tx.id, category)?;
                categorized += 1;
            }
        }
        Ok(categorized)
    }
}

fn median(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }

    let mut sorted = values.to_vec();
    sorted.sort();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / Decimal::TWO
    } else {
        sorted[mid]
    }
}
