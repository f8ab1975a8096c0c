//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod backup;
pub mod reports;
pub mod sms;
pub mod transactions;

// Re-export all handlers for use in router
pub use backup::*;
pub use reports::*;
pub use sms::*;
pub use transactions::*;

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{AppError, AppState};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ai_configured: bool,
}

/// GET /api/health - Liveness check, no owner required
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ai_configured: state.pipeline.classifier().ai().is_some(),
    })
}

/// Parse an optional `YYYY-MM-DD` query value
pub(crate) fn parse_date_param(
    value: Option<&str>,
    name: &str,
) -> Result<Option<NaiveDate>, AppError> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d"))
        .transpose()
        .map_err(|_| {
            AppError::bad_request(&format!("Invalid {} date format (use YYYY-MM-DD)", name))
        })
}
