//! Transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::parse_date_param;
use crate::{AppError, AppState, Owner, SuccessResponse, MAX_PAGE_LIMIT};
use pennywise_core::db::{SortField, SortOrder, TransactionFilter};
use pennywise_core::models::{Direction, ManualTransaction, Transaction, TransactionEdit};

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// Start date (YYYY-MM-DD, inclusive)
    pub from: Option<String>,
    /// End date (YYYY-MM-DD, inclusive)
    pub to: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// debit, credit or unknown
    pub direction: Option<String>,
    /// Substring match on merchant
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub payment_mode: Option<String>,
    pub failed: Option<bool>,
    #[serde(default)]
    pub recurring: bool,
    /// Sort field (date or amount)
    pub sort: Option<String>,
    /// Sort direction (asc or desc)
    pub order: Option<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub transactions: Vec<Transaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/transactions - List transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<TransactionQuery>,
) -> Result<Json<TransactionResponse>, AppError> {
    // Input validation: clamp pagination parameters
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);

    let from = parse_date_param(params.from.as_deref(), "from")?;
    let to = parse_date_param(params.to.as_deref(), "to")?;
    let direction = params
        .direction
        .as_deref()
        .map(|d| d.parse::<Direction>())
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;
    let sort_field = match params.sort.as_deref() {
        Some(s) => s.parse::<SortField>().map_err(|e| AppError::bad_request(&e))?,
        None => SortField::Timestamp,
    };
    let sort_order = match params.order.as_deref() {
        Some(s) => s.parse::<SortOrder>().map_err(|e| AppError::bad_request(&e))?,
        None => SortOrder::Desc,
    };

    let filter = TransactionFilter::new()
        .date_range(from, to)
        .amount_range(params.min_amount, params.max_amount)
        .direction(direction)
        .merchant(params.merchant.as_deref())
        .category(params.category.as_deref())
        .payment_mode(params.payment_mode.as_deref())
        .failed(params.failed)
        .recurring_only(params.recurring)
        .sort(sort_field, sort_order);

    let db = state.pipeline.db();
    let total = db.count_by_owner(&owner, &filter)?;
    let transactions = db.list_by_owner(&owner, &filter.limit(Some(limit)).offset(offset))?;

    Ok(Json(TransactionResponse {
        transactions,
        total,
        limit,
        offset,
    }))
}

/// GET /api/transactions/:id - Get a single transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state
        .pipeline
        .db()
        .get_transaction(&owner, id)?
        .ok_or_else(|| AppError::not_found("Transaction not found"))?;
    Ok(Json(tx))
}

/// POST /api/transactions - Record a manual transaction
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(body): Json<ManualTransaction>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    if body.amount <= Decimal::ZERO {
        return Err(AppError::bad_request("Amount must be positive"));
    }
    let tx = state.pipeline.add_manual_transaction(&owner, &body).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// PATCH /api/transactions/:id - Apply a user edit
pub async fn update_transaction(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<i64>,
    Json(edit): Json<TransactionEdit>,
) -> Result<Json<Transaction>, AppError> {
    if edit.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }
    let tx = state.pipeline.edit_transaction(&owner, id, &edit).await?;
    Ok(Json(tx))
}

/// DELETE /api/transactions/:id - Delete a transaction
pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.pipeline.delete_transaction(&owner, id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
