use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::sanitize::{LOG_BODY_LIMIT, sanitize_preview};
use crate::types::ModelId;

use super::backend::join_url;
use super::{CompletionProvider, CompletionRequest, CompletionResult, ProviderHttpClient};

/// An in-process or local completion capability. It is probed, never
/// assumed: the provider checks `is_available` before every call.
#[async_trait::async_trait]
pub trait EmbeddedCapability: Send + Sync {
    fn is_available(&self) -> bool;

    /// Build the prompt the capability will execute.
    fn build_prompt(&self, system: Option<&str>, prompt: &str) -> Result<String, ProviderError>;

    async fn execute(
        &self,
        prompt: &str,
        model: &ModelId,
        streaming: bool,
    ) -> Result<String, ProviderError>;
}

/// Adapts an [`EmbeddedCapability`] to the [`CompletionProvider`] seam.
pub struct EmbeddedProvider {
    capability: Arc<dyn EmbeddedCapability>,
}

impl EmbeddedProvider {
    pub fn new(capability: Arc<dyn EmbeddedCapability>) -> Self {
        Self { capability }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for EmbeddedProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResult, ProviderError> {
        if !self.capability.is_available() {
            return Err(ProviderError::Unavailable);
        }

        let prompt = self
            .capability
            .build_prompt(req.system.as_deref(), &req.prompt)?;
        let text = self
            .capability
            .execute(&prompt, &req.model, req.streaming)
            .await?;

        Ok(CompletionResult::new(self.name(), Some(text)))
    }

    fn name(&self) -> &str {
        "embedded"
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// Embedded capability backed by a local Ollama daemon.
pub struct OllamaCapability {
    client: reqwest::Client,
    host: String,
    model: Option<ModelId>,
    available: bool,
}

impl OllamaCapability {
    pub fn new(
        host: &str,
        model: Option<ModelId>,
        available: bool,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = ProviderHttpClient::new(timeout_secs)?.into_client();
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
            available,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait::async_trait]
impl EmbeddedCapability for OllamaCapability {
    fn is_available(&self) -> bool {
        self.available
    }

    fn build_prompt(&self, system: Option<&str>, prompt: &str) -> Result<String, ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::Embedded("prompt template is empty".to_string()));
        }
        Ok(match system {
            Some(system) if !system.trim().is_empty() => format!("{system}\n\n{prompt}"),
            _ => prompt.to_string(),
        })
    }

    async fn execute(
        &self,
        prompt: &str,
        model: &ModelId,
        streaming: bool,
    ) -> Result<String, ProviderError> {
        let model = self.model.as_ref().unwrap_or(model);
        let body = json!({
            "model": model.as_str(),
            "prompt": prompt,
            "stream": streaming,
        });

        let res = self
            .client
            .post(join_url(&self.host, "/api/generate"))
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            return Err(ProviderError::Embedded(format!(
                "Ollama returned {status}: {}",
                sanitize_preview(&err_text, LOG_BODY_LIMIT)
            )));
        }

        let text = res.text().await?;
        collect_generate_output(&text)
    }
}

/// Ollama answers with one JSON object, or with NDJSON chunks when
/// streaming. Either way the `response` fields are concatenated.
fn collect_generate_output(body: &str) -> Result<String, ProviderError> {
    let mut output = String::new();
    for line in body.lines().filter(|line| !line.trim().is_empty()) {
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|err| ProviderError::Embedded(format!("unreadable Ollama chunk: {err}")))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Embedded(error));
        }
        output.push_str(&chunk.response);
    }
    Ok(output)
}
