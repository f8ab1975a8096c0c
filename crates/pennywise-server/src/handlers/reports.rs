//! Enrichment, analytics and export handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;

use super::parse_date_param;
use crate::{AppError, AppState, Owner};
use pennywise_core::export::{ExportFormat, TransactionExportOptions};
use pennywise_core::models::{AnalyticsSummary, EnrichmentReport};

/// Inclusive date window shared by report endpoints
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// POST /api/enrich - Detect recurring payments and backfill categories
pub async fn run_enrichment(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<EnrichmentReport>, AppError> {
    let report = state.pipeline.run_enrichment(&owner).await?;
    Ok(Json(report))
}

/// GET /api/analytics/summary - Totals, top merchants/categories and monthly trends
pub async fn analytics_summary(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<PeriodQuery>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    let from = parse_date_param(params.from.as_deref(), "from")?;
    let to = parse_date_param(params.to.as_deref(), "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(AppError::bad_request("from must not be after to"));
        }
    }

    let summary = state.pipeline.db().analytics_summary(&owner, from, to)?;
    Ok(Json(summary))
}

/// GET /api/export/:format - Download transactions as CSV or JSON
pub async fn export_transactions(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(format): Path<String>,
    Query(params): Query<PeriodQuery>,
) -> Result<Response, AppError> {
    let format: ExportFormat = format.parse().map_err(|e: String| AppError::bad_request(&e))?;
    let opts = TransactionExportOptions {
        from: parse_date_param(params.from.as_deref(), "from")?,
        to: parse_date_param(params.to.as_deref(), "to")?,
    };

    let content = state.pipeline.db().export(&owner, format, &opts)?;

    let disposition = format!(
        "attachment; filename=\"transactions.{}\"",
        format.extension()
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| AppError::internal("Invalid export filename"))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(format.content_type()),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}
