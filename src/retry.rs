use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{DEFAULT_MAX_ATTEMPTS, clamp_attempts};
use crate::errors::{AttemptError, InterpretError, ProviderError};
use crate::interpret::interpret;
use crate::providers::{CompletionRequest, InvocationSelector};

/// Appended to every structured-output prompt.
pub const STRICT_OUTPUT_INSTRUCTIONS: &str = "\n\nOutput requirements:\n\
- Respond with a single JSON document and nothing else.\n\
- Use double quotes for every key and every string value.\n\
- Do not wrap the JSON in markdown code fences.\n\
- Do not add commentary before or after the JSON.";

/// Appended on every attempt after the first.
pub const RETRY_NOTICE: &str = "\n\nYour previous response was not valid JSON and could not be parsed. \
Correct it and respond again with valid JSON only.";

/// Bounded ask-for-JSON loop over the invocation selector.
#[derive(Clone)]
pub struct RetryController {
    selector: Arc<InvocationSelector>,
    max_attempts: u32,
}

impl RetryController {
    pub fn new(selector: Arc<InvocationSelector>) -> Self {
        Self {
            selector,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = clamp_attempts(max_attempts);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Ask for structured data with the controller's own attempt budget.
    pub async fn request(&self, request: &CompletionRequest) -> Result<Value, AttemptError> {
        self.request_json(request, self.max_attempts).await
    }

    /// Ask for structured data, giving up after `max_attempts` (clamped to
    /// `1..=5`). Exhaustion surfaces the last underlying error unchanged.
    pub async fn request_json(
        &self,
        request: &CompletionRequest,
        max_attempts: u32,
    ) -> Result<Value, AttemptError> {
        let attempts = clamp_attempts(max_attempts);
        let mut last_error: Option<AttemptError> = None;

        for attempt in 1..=attempts {
            let req = attempt_request(request, attempt);

            let outcome = match self.selector.invoke(&req).await {
                Ok(result) => interpret(result.text()).map_err(AttemptError::from),
                Err(err) => Err(AttemptError::from(err)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("structured response recovered on attempt {attempt}/{attempts}");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    log::warn!("attempt {attempt}/{attempts} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(AttemptError::NoValidJson);
        log::error!("giving up after {attempts} attempts: {err}");
        Err(err)
    }

    /// [`request`](Self::request) followed by deserialization into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, AttemptError> {
        let value = self.request(request).await?;
        serde_json::from_value(value).map_err(|err| {
            AttemptError::Interpretation(InterpretError::Malformed {
                message: err.to_string(),
                snippet: String::new(),
            })
        })
    }

    /// One best-effort, non-retried plain-text invocation.
    pub async fn invoke_text(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let result = self.selector.invoke(request).await?;
        Ok(result.text().trim().to_string())
    }
}

fn attempt_request(request: &CompletionRequest, attempt: u32) -> CompletionRequest {
    let mut prompt = format!("{}{STRICT_OUTPUT_INSTRUCTIONS}", request.prompt);
    if attempt > 1 {
        prompt.push_str(RETRY_NOTICE);
    }

    let mut req = request.clone();
    req.prompt = prompt;
    req.streaming = false;
    req.strict_json = true;
    req
}
