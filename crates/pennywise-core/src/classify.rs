//! Transactional classification for free text
//!
//! The AI service answers classification and extraction in one round trip;
//! when it is missing, slow, or broken the local pattern check decides.
//! Service failures never surface to callers.

use std::future::Future;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::ai::{AIBackend, AIClient, AiExtraction, DirectionResolution};
use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::ClassificationResult;

/// Reason recorded when the fallback finds nothing transactional
pub const FALLBACK_NO_MATCH: &str = "fallback: no pattern match";

/// Latency budget of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Single SMS: a timeout or error falls back immediately
    Interactive,
    /// Backup import / reprocessing: bounded retries with backoff
    Batch,
}

/// Classification plus the raw AI answer it came from (None on the fallback path)
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub result: ClassificationResult,
    pub ai_response: Option<AiExtraction>,
}

impl ClassificationOutcome {
    pub fn from_ai(&self) -> bool {
        self.ai_response.is_some()
    }
}

/// AI-first classifier with deterministic fallback
#[derive(Clone)]
pub struct Classifier {
    ai: Option<AIClient>,
    config: AiConfig,
}

impl Classifier {
    pub fn new(ai: Option<AIClient>, config: AiConfig) -> Self {
        Self { ai, config }
    }

    /// Classifier that only uses the local fallback
    pub fn offline() -> Self {
        Self::new(None, AiConfig::default())
    }

    pub fn ai(&self) -> Option<&AIClient> {
        self.ai.as_ref()
    }

    /// Decide whether `text` describes a transaction
    pub async fn classify(
        &self,
        text: &str,
        sender: Option<&str>,
        mode: CallMode,
    ) -> ClassificationOutcome {
        let Some(ai) = self.ai.as_ref() else {
            return fallback_outcome(text);
        };

        match self
            .call(mode, || ai.classify_and_extract(text, sender))
            .await
        {
            Ok(response) => {
                debug!(
                    is_transaction = response.is_transaction,
                    confidence = ?response.confidence,
                    "AI classification"
                );
                let result = ClassificationResult {
                    is_transactional: response.is_transaction,
                    confidence: response.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                    reason: response
                        .reason
                        .clone()
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "ai".to_string()),
                };
                ClassificationOutcome {
                    result,
                    ai_response: Some(response),
                }
            }
            Err(e) => {
                warn!(error = %e, "AI classification failed, using fallback");
                fallback_outcome(text)
            }
        }
    }

    /// Ask the AI which way money moved for an ambiguous statement row
    ///
    /// Returns None when there is no AI or the call failed.
    pub async fn resolve_direction(
        &self,
        description: &str,
        type_hint: Option<&str>,
        amount: &str,
        mode: CallMode,
    ) -> Option<DirectionResolution> {
        let ai = self.ai.as_ref()?;
        match self
            .call(mode, || ai.resolve_direction(description, type_hint, amount))
            .await
        {
            Ok(resolution) => Some(resolution),
            Err(e) => {
                warn!(error = %e, "AI direction resolution failed");
                None
            }
        }
    }

    /// Run one AI operation under the timeout/retry policy for `mode`
    async fn call<T, F, Fut>(&self, mode: CallMode, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retries = match mode {
            CallMode::Interactive => 0,
            CallMode::Batch => self.config.batch_max_retries,
        };

        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.config.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::ClassificationService(format!(
                    "AI call timed out after {:?}",
                    self.config.timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < retries => {
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    debug!(attempt, error = %e, ?backoff, "Retrying AI call");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn fallback_outcome(text: &str) -> ClassificationOutcome {
    ClassificationOutcome {
        result: fallback_classify(text),
        ai_response: None,
    }
}

/// Deterministic classification: an amount-like token plus a transaction verb
pub fn fallback_classify(text: &str) -> ClassificationResult {
    if matches_transaction_pattern(text) {
        ClassificationResult {
            is_transactional: true,
            confidence: 0.6,
            reason: "fallback: amount and transaction verb".to_string(),
        }
    } else {
        ClassificationResult {
            is_transactional: false,
            confidence: 0.0,
            reason: FALLBACK_NO_MATCH.to_string(),
        }
    }
}

struct Patterns {
    amount_like: Regex,
    verb: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        amount_like: Regex::new(
            r"(?i)(?:₹|\brs\.?|\binr\b|\busd\b|\$|€|£)\s*\d|\b\d[\d,]*(?:\.\d{1,2})?\b",
        )
        .expect("valid regex"),
        verb: Regex::new(
            r"(?i)\b(?:debited|credited|spent|sent|paid|received|withdrawn|deposited|transferred|charged|refunded)\b",
        )
        .expect("valid regex"),
    })
}

/// Whether text co-locates a money amount with a transaction verb
pub fn matches_transaction_pattern(text: &str) -> bool {
    let p = patterns();
    p.amount_like.is_match(text) && p.verb.is_match(text)
}
