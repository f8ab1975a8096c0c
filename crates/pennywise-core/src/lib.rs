//! Pennywise Core Library
//!
//! Transaction extraction and normalization engine:
//! - Input adapters for SMS text and CSV/XML/TXT/JSON backup files
//! - AI-first classification and extraction with a deterministic fallback
//! - Reconciliation into canonical, deduplicated transactions
//! - Recurring payment detection and category backfill
//! - Pipeline orchestration with bounded concurrency and per-owner locking
//! - SQLite storage (optionally SQLCipher-encrypted)

pub mod adapter;
pub mod ai;
pub mod categorize;
pub mod classify;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod reconcile;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapter::{AdapterParseError, BackupItems};
pub use ai::{
    AIBackend, AIClient, AiExtraction, DirectionResolution, MockBackend, OllamaBackend,
    OpenAICompatibleBackend,
};
pub use categorize::CategoryTable;
pub use classify::{CallMode, Classifier};
pub use config::EngineConfig;
pub use db::{Database, SortField, SortOrder, TransactionFilter};
pub use enrich::{Cadence, Enricher, RecurringGroup};
pub use error::{Error, Result};
pub use export::{ExportFormat, TransactionExportOptions};
pub use models::*;
pub use pipeline::{CancelToken, Pipeline};
pub use prompts::{Prompt, PromptId, PromptLibrary};
pub use reconcile::{ReconcileOutcome, Reconciler};
