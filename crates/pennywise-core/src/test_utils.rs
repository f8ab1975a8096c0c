//! Test utilities for pennywise-core
//!
//! A mock Ollama server for integration tests and local development. It
//! answers the two prompts the engine sends, using the local pattern
//! extractor in place of a model.

use axum::{
    extract::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::oneshot;

use crate::classify::matches_transaction_pattern;
use crate::extract::{extract_free_text, infer_direction};
use crate::models::Direction;

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            size: 4_000_000_000,
        }],
    })
}

/// Ollama generate endpoint
async fn handle_generate(Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    // These markers match the prompt files in prompts/*.md
    let response = if request.prompt.contains("Is this statement row a debit or a credit?") {
        handle_direction_mock(&request.prompt)
    } else {
        handle_classify_mock(&request.prompt)
    };

    Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    })
}

/// Pull the text after `label` up to `terminator` (or end of line)
fn section<'a>(prompt: &'a str, label: &str, terminator: &str) -> &'a str {
    let Some(start) = prompt.find(label) else {
        return "";
    };
    let rest = &prompt[start + label.len()..];
    let end = rest.find(terminator).unwrap_or(rest.len());
    rest[..end].trim()
}

/// Handle classify_extract request
fn handle_classify_mock(prompt: &str) -> String {
    let message = section(prompt, "Message: ", "\n\nRespond with a single JSON object");

    if message.to_lowercase().contains("otp") || !matches_transaction_pattern(message) {
        return json!({
            "is_transaction": false,
            "confidence": 0.97,
            "reason": "not a transaction alert"
        })
        .to_string();
    }

    match extract_free_text(message, Utc::now()) {
        Ok(tx) => json!({
            "is_transaction": true,
            "confidence": 0.92,
            "reason": "bank transaction alert",
            "transaction_type": tx.direction.as_str(),
            "amount": tx.amount.to_string().parse::<f64>().unwrap_or_default(),
            "currency": "INR",
            "merchant": tx.merchant,
            "transaction_date": null,
            "reference_number": tx.reference_number,
            "account_number": tx.account_hint,
            "card_number": null,
            "payment_method": tx.payment_mode,
            "bank_name": tx.bank_hint,
            "remarks": null,
            "is_failed": tx.failed
        })
        .to_string(),
        Err(_) => json!({
            "is_transaction": false,
            "confidence": 0.6,
            "reason": "no amount in message"
        })
        .to_string(),
    }
}

/// Handle resolve_direction request
fn handle_direction_mock(prompt: &str) -> String {
    let description = section(prompt, "Description: ", "\n");
    let type_hint = section(prompt, "Type column: ", "\n");
    let upper = description.to_uppercase();

    let direction = if upper.contains("REFUND") || upper.contains("CASHBACK") {
        Direction::Credit
    } else {
        infer_direction(&format!("{} {}", description, type_hint))
    };

    json!({
        "direction": direction.as_str(),
        "merchant": null,
        "confidence": 0.85
    })
    .to_string()
}

// Ollama API types

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}
