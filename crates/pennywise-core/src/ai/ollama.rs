//! Ollama backend implementation
//!
//! HTTP client for the Ollama `/api/generate` endpoint, using the prompt
//! library for customizable prompts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::prompts::{PromptId, PromptLibrary};

use super::parsing::{parse_direction, parse_extraction};
use super::types::{AiExtraction, DirectionResolution};
use super::AIBackend;

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    prompts: Arc<RwLock<PromptLibrary>>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            prompts: Arc::new(RwLock::new(PromptLibrary::new())),
        }
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }

    /// Render a prompt into (system, user) parts
    fn render(&self, id: PromptId, vars: &HashMap<&str, &str>) -> Result<(Option<String>, String)> {
        let mut prompts = self
            .prompts
            .write()
            .map_err(|_| Error::ClassificationService("Failed to acquire prompt library lock".into()))?;
        let prompt = prompts.get(id)?;
        Ok((
            prompt.system_section().map(str::to_string),
            prompt.render_user(vars),
        ))
    }

    async fn generate(&self, system: Option<String>, prompt: String) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt,
            system,
            format: "json",
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let ollama_response: OllamaResponse = response.json().await?;
        debug!("Ollama response: {}", ollama_response.response);
        Ok(ollama_response.response)
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    format: &'static str,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn classify_and_extract(
        &self,
        text: &str,
        sender: Option<&str>,
    ) -> Result<AiExtraction> {
        let mut vars = HashMap::new();
        vars.insert("message", text);
        vars.insert("sender", sender.unwrap_or(""));
        let (system, prompt) = self.render(PromptId::ClassifyExtract, &vars)?;

        let response = self.generate(system, prompt).await?;
        parse_extraction(&response)
    }

    async fn resolve_direction(
        &self,
        description: &str,
        type_hint: Option<&str>,
        amount: &str,
    ) -> Result<DirectionResolution> {
        let mut vars = HashMap::new();
        vars.insert("description", description);
        vars.insert("type_hint", type_hint.unwrap_or(""));
        vars.insert("amount", amount);
        let (system, prompt) = self.render(PromptId::ResolveDirection, &vars)?;

        let response = self.generate(system, prompt).await?;
        parse_direction(&response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
