//! Transaction command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use pennywise_core::db::{Database, SortField, SortOrder, TransactionFilter};
use pennywise_core::models::{Direction, ManualTransaction, Transaction, TransactionEdit};
use pennywise_core::Pipeline;
use rust_decimal::Decimal;

use super::{format_amount, parse_date_arg, parse_datetime_arg, truncate};

/// Arguments for `transactions list`
#[derive(Debug, Default)]
pub struct ListArgs<'a> {
    pub limit: i64,
    pub offset: i64,
    pub from: Option<&'a str>,
    pub to: Option<&'a str>,
    pub direction: Option<&'a str>,
    pub merchant: Option<&'a str>,
    pub category: Option<&'a str>,
    pub recurring: bool,
    pub sort: &'a str,
    pub order: &'a str,
}

/// Arguments for `transactions add`
#[derive(Debug, Default)]
pub struct AddArgs<'a> {
    pub amount: &'a str,
    pub direction: &'a str,
    pub merchant: Option<&'a str>,
    pub category: Option<&'a str>,
    pub date: Option<&'a str>,
    pub mode: Option<&'a str>,
    pub reference: Option<&'a str>,
    pub remarks: Option<&'a str>,
}

fn parse_direction(value: &str) -> Result<Direction> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

pub fn cmd_transactions_list(db: &Database, owner: &str, args: &ListArgs) -> Result<()> {
    let from = parse_date_arg(args.from, "--from")?;
    let to = parse_date_arg(args.to, "--to")?;
    let direction = args.direction.map(parse_direction).transpose()?;
    let sort: SortField = args.sort.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let order: SortOrder = args.order.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let filter = TransactionFilter::new()
        .date_range(from, to)
        .direction(direction)
        .merchant(args.merchant)
        .category(args.category)
        .recurring_only(args.recurring)
        .sort(sort, order)
        .limit(Some(args.limit))
        .offset(args.offset);

    let transactions = db.list_by_owner(owner, &filter)?;
    if transactions.is_empty() {
        println!("No transactions found. Import some with:");
        println!("  pennywise import --file sms_backup.xml");
        return Ok(());
    }
    let total = db.count_by_owner(owner, &filter)?;

    println!();
    println!("📝 Transactions ({} of {})", transactions.len(), total);
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in &transactions {
        let recurring = if tx.recurring_group_id.is_some() {
            " 🔁"
        } else {
            ""
        };
        println!(
            "   [{}] {} │ {:>12} │ {:<30} │ {}{}",
            tx.id,
            tx.ts.format("%Y-%m-%d"),
            format_amount(tx.amount, tx.direction),
            truncate(tx.merchant.as_deref().unwrap_or("-"), 30),
            tx.category,
            recurring
        );
    }

    Ok(())
}

pub fn cmd_transactions_show(db: &Database, owner: &str, id: i64) -> Result<()> {
    let tx = db
        .get_transaction(owner, id)?
        .ok_or_else(|| anyhow::anyhow!("Transaction {} not found", id))?;
    print_transaction(&tx);
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    println!();
    println!("💳 Transaction {}", tx.id);
    println!("   ─────────────────────────────");
    println!("   Date:       {}", tx.ts.format("%Y-%m-%d %H:%M:%S"));
    println!("   Amount:     {}", format_amount(tx.amount, tx.direction));
    println!("   Direction:  {}", tx.direction);
    println!("   Merchant:   {}", text(&tx.merchant));
    println!("   Category:   {}", tx.category);
    println!("   Mode:       {}", text(&tx.payment_mode));
    println!("   Reference:  {}", text(&tx.reference_number));
    println!("   Account:    {}", text(&tx.account_hint));
    println!("   Bank:       {}", text(&tx.bank_hint));
    println!("   Remarks:    {}", text(&tx.remarks));
    if tx.failed {
        println!("   ⚠️  Failed / declined");
    }
    if let Some(group) = &tx.recurring_group_id {
        println!("   🔁 Recurring group {}", group);
    }
    println!(
        "   Extracted:  {} (confidence {:.2})",
        tx.extraction_method, tx.confidence
    );
    if let Some(source) = tx.source_id {
        println!("   Raw item:   {}", source);
    }
    if !tx.user_edited.is_empty() {
        let fields: Vec<&str> = tx.user_edited.iter().map(|f| f.as_str()).collect();
        println!("   Edited:     {}", fields.join(", "));
    }
}

pub async fn cmd_transactions_add(
    pipeline: &Pipeline,
    owner: &str,
    args: &AddArgs<'_>,
) -> Result<()> {
    let amount: Decimal = args
        .amount
        .trim()
        .parse()
        .with_context(|| format!("Invalid amount: {}", args.amount))?;
    let ts = parse_datetime_arg(args.date, "--date")?.unwrap_or_else(Utc::now);

    let input = ManualTransaction {
        ts,
        amount,
        direction: parse_direction(args.direction)?,
        merchant: args.merchant.map(str::to_string),
        category: args.category.map(str::to_string),
        payment_mode: args.mode.map(str::to_string),
        reference_number: args.reference.map(str::to_string),
        account_hint: None,
        remarks: args.remarks.map(str::to_string),
        failed: false,
    };

    let tx = pipeline.add_manual_transaction(owner, &input).await?;
    println!("✅ Added transaction {}", tx.id);
    println!(
        "   {} │ {:>12} │ {} │ {}",
        tx.ts.format("%Y-%m-%d"),
        format_amount(tx.amount, tx.direction),
        truncate(tx.merchant.as_deref().unwrap_or("-"), 30),
        tx.category
    );
    Ok(())
}

pub async fn cmd_transactions_edit(
    pipeline: &Pipeline,
    owner: &str,
    id: i64,
    edit: &TransactionEdit,
) -> Result<()> {
    if edit.is_empty() {
        anyhow::bail!("Nothing to change; pass --category, --merchant, --remarks or --failed");
    }

    let tx = pipeline.edit_transaction(owner, id, edit).await?;
    println!("✅ Updated transaction {}", tx.id);
    let fields: Vec<&str> = edit.touched_fields().iter().map(|f| f.as_str()).collect();
    println!("   Locked against automatic changes: {}", fields.join(", "));
    Ok(())
}

pub async fn cmd_transactions_delete(pipeline: &Pipeline, owner: &str, id: i64) -> Result<()> {
    pipeline.delete_transaction(owner, id).await?;
    println!("🗑️  Deleted transaction {}", id);
    Ok(())
}
