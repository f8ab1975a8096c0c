//! Error types for Pennywise

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A whole backup file could not be read (malformed JSON document, bad header)
    #[error("Adapter parse error: {0}")]
    AdapterParse(String),

    /// The AI service failed, timed out, or returned something unusable
    #[error("Classification service error: {0}")]
    ClassificationService(String),

    #[error("Unsupported file kind: {0}")]
    UnsupportedFileKind(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the persistence layer
    ///
    /// The pipeline retries storage failures once before reporting them.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Pool(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
