//! The five built-in stages, in pipeline order.

mod graph;
mod recipe;
mod scaling;
mod ui;
mod validation;

pub use graph::{GraphStage, normalize_graph};
pub use recipe::{PERCENTAGE_TOLERANCE, RecipeStage};
pub use scaling::ScalingStage;
pub use ui::UiStage;
pub use validation::ValidationStage;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::config::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::errors::{ProviderError, StageError};
use crate::providers::CompletionRequest;
use crate::retry::RetryController;
use crate::types::ModelId;

use super::types::ArtifactKind;

/// System instruction for every structured stage request.
pub const STAGE_SYSTEM_PROMPT: &str = "You are a food formulation assistant inside an automated pipeline. \
Respond with valid JSON only; no commentary; no markdown fences. \
If you cannot complete the task, respond with {\"error\": \"<reason>\"}.";

/// Sampling settings shared by every stage of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct StageSettings {
    pub model: ModelId,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Bound on each invocation; a slower call counts as failed.
    pub deadline: Option<Duration>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            model: ModelId::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            deadline: None,
        }
    }
}

/// What a stage needs to talk to the completion service.
#[derive(Clone)]
pub struct StageRuntime {
    retry: RetryController,
    settings: StageSettings,
}

impl StageRuntime {
    pub fn new(retry: RetryController, settings: StageSettings) -> Self {
        Self { retry, settings }
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest::new(prompt)
            .with_model(self.settings.model.clone())
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens)
            .with_deadline(self.settings.deadline)
    }

    /// Structured request through the retry controller.
    async fn ask(&self, prompt: String) -> Result<Value, StageError> {
        let request = self.request(prompt).with_system(STAGE_SYSTEM_PROMPT);
        let value = self.retry.request(&request).await?;
        Ok(value)
    }

    /// Single best-effort free-text request.
    async fn explain(&self, prompt: String) -> Result<String, ProviderError> {
        self.retry.invoke_text(&self.request(prompt)).await
    }
}

/// Shape an interpreted value into a stage artifact. A model-reported
/// `{"error": ...}` object and a value missing required fields are both
/// stage failures.
fn decode<T: DeserializeOwned>(kind: ArtifactKind, value: Value) -> Result<T, StageError> {
    if let Some(reason) = reported_error(&value) {
        return Err(StageError::Failed(format!(
            "model declined the {kind} request: {reason}"
        )));
    }
    if !value.is_object() {
        return Err(StageError::incomplete(kind, "expected a JSON object"));
    }
    serde_json::from_value(value).map_err(|err| StageError::incomplete(kind, err.to_string()))
}

fn reported_error(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    let reason = object.get("error")?.as_str()?;
    (object.len() == 1).then_some(reason)
}

/// Pretty JSON for embedding artifacts in prompts.
fn json_block<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}
