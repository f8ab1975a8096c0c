//! SMS ingestion and raw item handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppState, Owner, SuccessResponse, MAX_PAGE_LIMIT};
use pennywise_core::models::{
    BatchReport, RawItemStats, RawItemStatus, SmsInput, SmsOutcome, StoredRawItem,
};

/// Single SMS payload
#[derive(Debug, Deserialize)]
pub struct IngestSmsRequest {
    pub text: String,
    pub sender: Option<String>,
    /// RFC 3339 timestamp reported by the device
    pub received_at: Option<DateTime<Utc>>,
}

/// POST /api/sms - Ingest one SMS
pub async fn ingest_sms(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(body): Json<IngestSmsRequest>,
) -> Result<Json<SmsOutcome>, AppError> {
    if body.text.trim().is_empty() {
        return Err(AppError::bad_request("SMS text is required"));
    }

    let input = SmsInput {
        text: body.text,
        received_at: body.received_at,
        sender: body.sender,
    };
    let outcome = state.pipeline.ingest_sms(&owner, &input).await?;
    Ok(Json(outcome))
}

/// Query parameters for listing raw messages
#[derive(Debug, Deserialize)]
pub struct SmsListQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct SmsListResponse {
    pub items: Vec<StoredRawItem>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/sms - List stored raw items, newest first
pub async fn list_sms(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<SmsListQuery>,
) -> Result<Json<SmsListResponse>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);
    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<RawItemStatus>())
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;

    let items = state
        .pipeline
        .db()
        .list_raw_items(&owner, status, limit, offset)?;

    Ok(Json(SmsListResponse {
        items,
        limit,
        offset,
    }))
}

/// GET /api/sms/stats - Parsing statistics
pub async fn sms_stats(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<RawItemStats>, AppError> {
    let stats = state.pipeline.db().raw_item_stats(&owner)?;
    Ok(Json(stats))
}

/// Optional explicit selection for reprocessing
#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// POST /api/sms/reprocess - Retry unparsed items, or the given ids
pub async fn reprocess_sms(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    body: Option<Json<ReprocessRequest>>,
) -> Result<Json<BatchReport>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let report = if request.ids.is_empty() {
        state.pipeline.reprocess_unparsed(&owner).await?
    } else {
        state.pipeline.reprocess_items(&owner, &request.ids).await?
    };

    info!(
        owner = %owner,
        processed = report.processed,
        stored = report.stored,
        failures = report.failures.len(),
        "Reprocess finished"
    );
    Ok(Json(report))
}

/// GET /api/sms/:id - One raw item with its processing status
pub async fn get_sms(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<i64>,
) -> Result<Json<StoredRawItem>, AppError> {
    let item = state
        .pipeline
        .db()
        .get_raw_item(&owner, id)?
        .ok_or_else(|| AppError::not_found("Raw item not found"))?;
    Ok(Json(item))
}

/// DELETE /api/sms/:id - Delete a raw item; linked transactions are kept
pub async fn delete_sms(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.pipeline.db().delete_raw_item(&owner, id)? {
        return Err(AppError::not_found("Raw item not found"));
    }
    Ok(Json(SuccessResponse { success: true }))
}
