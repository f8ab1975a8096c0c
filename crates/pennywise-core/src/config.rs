//! Engine configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for an override file (explicit path, or ~/.local/share/pennywise/config/engine.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Override files only need the keys they change; everything else keeps the
//! embedded value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// AI call policy
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Timeout applied to every AI call
    pub timeout: Duration,
    /// Extra attempts for batch items (single SMS never retries)
    pub batch_max_retries: u32,
    /// Backoff before the first retry, doubled per attempt
    pub retry_backoff: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            batch_max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent extractions per backup import
    pub max_concurrency: usize,
    /// Extra attempts for a failed storage write
    pub storage_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            storage_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileConfig {
    /// Match reference-less rows on amount + minute + merchant
    pub loose_duplicate_match: bool,
}

/// Thresholds for recurring payment detection
#[derive(Debug, Clone)]
pub struct RecurringConfig {
    pub amount_tolerance: f64,
    pub min_occurrences: usize,
    pub min_regular_ratio: f64,
    pub weekly_tolerance_days: i64,
    pub monthly_tolerance_days: i64,
    pub yearly_tolerance_days: i64,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.02,
            min_occurrences: 3,
            min_regular_ratio: 0.7,
            weekly_tolerance_days: 2,
            monthly_tolerance_days: 4,
            yearly_tolerance_days: 10,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub ai: AiConfig,
    pub pipeline: PipelineConfig,
    pub reconcile: ReconcileConfig,
    pub recurring: RecurringConfig,
    /// Extra category keywords, merged into the built-in table
    pub extra_categories: BTreeMap<String, Vec<String>>,
}

impl EngineConfig {
    /// Load from the default override location, falling back to embedded defaults
    pub fn load() -> Result<Self> {
        load_config(None)
    }

    /// Load from an explicit override file
    ///
    /// A missing file is not an error; the embedded defaults are used.
    pub fn load_from(path: &Path) -> Result<Self> {
        load_config(Some(path))
    }

    /// Parse a TOML document layered over the built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        parse_config(content, EngineConfig::default())
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("pennywise").join("config").join("engine.toml"))
}

fn load_config(override_path: Option<&Path>) -> Result<EngineConfig> {
    let base = parse_config(DEFAULT_CONFIG, EngineConfig::default())?;

    let path = match override_path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path(),
    };

    match path {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
            tracing::debug!(path = %path.display(), "Loading engine config override");
            parse_config(&content, base)
        }
        _ => Ok(base),
    }
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    ai: Option<RawAi>,
    pipeline: Option<RawPipeline>,
    reconcile: Option<RawReconcile>,
    recurring: Option<RawRecurring>,
    categories: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawAi {
    timeout_secs: Option<u64>,
    batch_max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    max_concurrency: Option<usize>,
    storage_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawReconcile {
    loose_duplicate_match: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRecurring {
    amount_tolerance: Option<f64>,
    min_occurrences: Option<usize>,
    min_regular_ratio: Option<f64>,
    weekly_tolerance_days: Option<i64>,
    monthly_tolerance_days: Option<i64>,
    yearly_tolerance_days: Option<i64>,
}

/// Parse config from TOML content, applying it over `config`
fn parse_config(content: &str, mut config: EngineConfig) -> Result<EngineConfig> {
    let raw: RawConfig =
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    if let Some(ai) = raw.ai {
        if let Some(secs) = ai.timeout_secs {
            config.ai.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = ai.batch_max_retries {
            config.ai.batch_max_retries = retries;
        }
        if let Some(ms) = ai.retry_backoff_ms {
            config.ai.retry_backoff = Duration::from_millis(ms);
        }
    }

    if let Some(pipeline) = raw.pipeline {
        if let Some(n) = pipeline.max_concurrency {
            if n == 0 {
                return Err(Error::Config("pipeline.max_concurrency must be at least 1".into()));
            }
            config.pipeline.max_concurrency = n;
        }
        if let Some(n) = pipeline.storage_retries {
            config.pipeline.storage_retries = n;
        }
    }

    if let Some(reconcile) = raw.reconcile {
        if let Some(loose) = reconcile.loose_duplicate_match {
            config.reconcile.loose_duplicate_match = loose;
        }
    }

    if let Some(rec) = raw.recurring {
        if let Some(v) = rec.amount_tolerance {
            if !(0.0..1.0).contains(&v) {
                return Err(Error::Config("recurring.amount_tolerance must be in [0, 1)".into()));
            }
            config.recurring.amount_tolerance = v;
        }
        if let Some(v) = rec.min_occurrences {
            config.recurring.min_occurrences = v.max(2);
        }
        if let Some(v) = rec.min_regular_ratio {
            config.recurring.min_regular_ratio = v;
        }
        if let Some(v) = rec.weekly_tolerance_days {
            config.recurring.weekly_tolerance_days = v;
        }
        if let Some(v) = rec.monthly_tolerance_days {
            config.recurring.monthly_tolerance_days = v;
        }
        if let Some(v) = rec.yearly_tolerance_days {
            config.recurring.yearly_tolerance_days = v;
        }
    }

    if let Some(categories) = raw.categories {
        for (category, keywords) in categories {
            config
                .extra_categories
                .entry(category.to_lowercase())
                .or_default()
                .extend(keywords.into_iter().map(|k| k.to_lowercase()));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() {
        let config = EngineConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.ai.timeout, Duration::from_secs(20));
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert!(!config.reconcile.loose_duplicate_match);
        assert_eq!(config.recurring.min_occurrences, 3);
        assert!(config.extra_categories.is_empty());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
[reconcile]
loose_duplicate_match = true

[categories]
Subscriptions = ["Spotify"]
"#,
        )
        .unwrap();

        assert!(config.reconcile.loose_duplicate_match);
        assert_eq!(config.pipeline.storage_retries, 1);
        assert_eq!(
            config.extra_categories.get("subscriptions"),
            Some(&vec!["spotify".to_string()])
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml("[pipeline]\nmax_concurrency = 0").is_err());
        assert!(EngineConfig::from_toml("[recurring]\namount_tolerance = 1.5").is_err());
        assert!(EngineConfig::from_toml("not toml at all [").is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let config = EngineConfig::load_from(Path::new("/nonexistent/engine.toml")).unwrap();
        assert_eq!(config.ai.batch_max_retries, 2);
    }
}
