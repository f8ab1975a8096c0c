//! Mock backend for testing
//!
//! Answers from canned responses keyed by substring, and otherwise mimics a
//! competent model using the local pattern extractor. Can be made to fail or
//! stall so the fallback and timeout paths can be exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::classify::matches_transaction_pattern;
use crate::error::{Error, Result};
use crate::extract::{extract_free_text, infer_direction};
use crate::models::Direction;

use super::types::{AiExtraction, DirectionResolution};
use super::AIBackend;

/// Mock AI backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    failing: bool,
    delay: Option<Duration>,
    responses: Arc<Vec<(String, AiExtraction)>>,
    directions: Arc<Vec<(String, Direction)>>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            failing: false,
            delay: None,
            responses: Arc::new(Vec::new()),
            directions: Arc::new(Vec::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an unhealthy mock backend
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// Every call returns a service error
    pub fn failing() -> Self {
        Self {
            healthy: false,
            failing: true,
            ..Self::new()
        }
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return `response` for any message containing `pattern`
    pub fn with_response(mut self, pattern: &str, response: AiExtraction) -> Self {
        let mut responses = (*self.responses).clone();
        responses.push((pattern.to_string(), response));
        self.responses = Arc::new(responses);
        self
    }

    /// Answer `direction` for any row description containing `pattern`
    pub fn with_direction(mut self, pattern: &str, direction: Direction) -> Self {
        let mut directions = (*self.directions).clone();
        directions.push((pattern.to_string(), direction));
        self.directions = Arc::new(directions);
        self
    }

    /// Number of AI calls made so far (shared across clones)
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(Error::ClassificationService("mock backend unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn classify_and_extract(
        &self,
        text: &str,
        _sender: Option<&str>,
    ) -> Result<AiExtraction> {
        self.begin_call().await?;

        if let Some((_, canned)) = self.responses.iter().find(|(p, _)| text.contains(p.as_str())) {
            return Ok(canned.clone());
        }

        let lower = text.to_lowercase();
        if lower.contains("otp") || !matches_transaction_pattern(text) {
            return Ok(AiExtraction::non_transaction(0.95, "mock: not a transaction"));
        }

        match extract_free_text(text, Utc::now()) {
            Ok(tx) => Ok(AiExtraction {
                is_transaction: true,
                confidence: Some(0.9),
                reason: Some("mock: transaction alert".to_string()),
                transaction_type: Some(tx.direction.as_str().to_string()),
                amount: Some(serde_json::Value::String(tx.amount.to_string())),
                currency: Some("INR".to_string()),
                merchant: tx.merchant,
                transaction_date: None,
                reference_number: tx.reference_number,
                account_number: tx.account_hint,
                card_number: None,
                payment_method: tx.payment_mode,
                bank_name: tx.bank_hint,
                remarks: None,
                is_failed: Some(tx.failed),
            }),
            Err(_) => Ok(AiExtraction::non_transaction(0.6, "mock: no amount")),
        }
    }

    async fn resolve_direction(
        &self,
        description: &str,
        type_hint: Option<&str>,
        _amount: &str,
    ) -> Result<DirectionResolution> {
        self.begin_call().await?;

        let direction = self
            .directions
            .iter()
            .find(|(p, _)| description.contains(p.as_str()))
            .map(|(_, d)| *d)
            .unwrap_or_else(|| {
                let combined = format!("{} {}", description, type_hint.unwrap_or(""));
                infer_direction(&combined)
            });

        Ok(DirectionResolution {
            direction: Some(direction.as_str().to_string()),
            merchant: None,
            confidence: Some(0.8),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_extracts_debit_alert() {
        let mock = MockBackend::new();
        let result = mock
            .classify_and_extract("Rs 1,250.00 spent on your card XX9876 at AMAZON", None)
            .await
            .unwrap();
        assert!(result.is_transaction);
        assert_eq!(result.transaction_type.as_deref(), Some("debit"));
        assert_eq!(result.amount, Some(serde_json::json!("1250.00")));
    }

    #[tokio::test]
    async fn test_mock_rejects_otp() {
        let mock = MockBackend::new();
        let result = mock
            .classify_and_extract("Your OTP is 123456", None)
            .await
            .unwrap();
        assert!(!result.is_transaction);
    }

    #[tokio::test]
    async fn test_mock_canned_response_and_call_count() {
        let canned = AiExtraction {
            is_transaction: true,
            merchant: Some("Canned".into()),
            ..Default::default()
        };
        let mock = MockBackend::new().with_response("hello", canned.clone());
        let clone = mock.clone();

        assert_eq!(clone.classify_and_extract("hello world", None).await.unwrap(), canned);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let mock = MockBackend::failing();
        assert!(!mock.health_check().await);
        assert!(mock.classify_and_extract("anything", None).await.is_err());
        assert!(mock.resolve_direction("x", None, "1").await.is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_direction_override() {
        let mock = MockBackend::new().with_direction("ACME", Direction::Credit);
        let result = mock.resolve_direction("ACME PAYROLL", None, "10").await.unwrap();
        assert_eq!(result.direction.as_deref(), Some("credit"));
    }
}
