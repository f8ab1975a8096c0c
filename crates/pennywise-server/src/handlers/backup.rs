//! Backup file handlers

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppState, Owner, MAX_UPLOAD_SIZE};
use pennywise_core::models::{BackupValidation, BatchReport};

/// Backup upload body; `content` is plain text or base64
#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    pub file_kind: String,
    pub content: String,
}

/// Size check and kind/content validation shared by both endpoints
fn check_backup(state: &AppState, body: &BackupRequest) -> Result<BackupValidation, AppError> {
    if body.content.len() > MAX_UPLOAD_SIZE / 3 * 4 {
        return Err(AppError::payload_too_large("File too large (max 10MB)"));
    }

    let validation = state.pipeline.validate_backup(&body.file_kind, &body.content)?;
    if validation.decoded_bytes > MAX_UPLOAD_SIZE {
        return Err(AppError::payload_too_large("File too large (max 10MB)"));
    }
    Ok(validation)
}

/// POST /api/backup/validate - Check kind and content without importing
pub async fn validate_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackupRequest>,
) -> Result<Json<BackupValidation>, AppError> {
    let validation = check_backup(&state, &body)?;
    Ok(Json(validation))
}

/// POST /api/backup/upload - Import a backup file
pub async fn upload_backup(
    State(state): State<Arc<AppState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(body): Json<BackupRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let validation = check_backup(&state, &body)?;

    let report = state
        .pipeline
        .ingest_backup_file(&owner, validation.file_kind, &body.content)
        .await?;

    info!(
        owner = %owner,
        kind = %validation.file_kind,
        processed = report.processed,
        stored = report.stored,
        duplicates = report.duplicates,
        failures = report.failures.len(),
        "Backup imported"
    );
    Ok(Json(report))
}
