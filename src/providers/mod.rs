use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

pub mod backend;
pub mod embedded;
pub mod selector;

use crate::config::{
    DEFAULT_BACKEND_URL, DEFAULT_COMPLETION_PATH, DEFAULT_MAX_TOKENS, DEFAULT_OLLAMA_HOST,
    DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS,
};
use crate::config_file::ProviderConfig;
use crate::errors::ProviderError;
use crate::types::ModelId;
use reqwest::Client;

pub use backend::BackendProvider;
pub use embedded::{EmbeddedCapability, EmbeddedProvider, OllamaCapability};
pub use selector::{InvocationOutcome, InvocationSelector};

/// System instruction forced onto every strict-JSON request.
pub const STRICT_JSON_SYSTEM_PROMPT: &str = "You respond with valid JSON only. \
Do not add commentary. Do not wrap the JSON in markdown fences. \
If you cannot complete the task, respond with a JSON object of the form {\"error\": \"<reason>\"}.";

pub(crate) struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub fn into_client(self) -> Client {
        self.client
    }
}

/// One request to a text-completion capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: ModelId,
    pub streaming: bool,
    pub strict_json: bool,
    /// Caller-supplied bound on how long one invocation may take.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: ModelId::default(),
            streaming: false,
            strict_json: false,
            deadline: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_model(mut self, model: ModelId) -> Self {
        self.model = model;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_strict_json(mut self, strict_json: bool) -> Self {
        self.strict_json = strict_json;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ProviderError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The request as it goes on the wire: strict mode turns streaming off
    /// and puts the strict-JSON instruction ahead of the caller's own.
    pub fn effective(&self) -> CompletionRequest {
        let mut req = self.clone();
        if req.strict_json {
            req.streaming = false;
            req.system = Some(match req.system.as_deref() {
                Some(system) if !system.trim().is_empty() => {
                    format!("{STRICT_JSON_SYSTEM_PROMPT}\n\n{system}")
                }
                _ => STRICT_JSON_SYSTEM_PROMPT.to_string(),
            });
        }
        req
    }
}

/// Raw text from a completion call. `text == None` means the call
/// succeeded but produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub text: Option<String>,
    pub provider: String,
}

impl CompletionResult {
    pub fn new(provider: impl Into<String>, text: Option<String>) -> Self {
        Self {
            text,
            provider: provider.into(),
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// A completion path the selector can try.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform one completion call.
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResult, ProviderError>;

    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Validate that this provider is properly configured
    fn validate_config(&self) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    /// Model override (e.g. from CLI -m/--model)
    pub model: Option<ModelId>,
    pub backend_url: Option<String>,
    pub embedded: Option<bool>,
}

/// Settings resolved from overrides, environment, config file and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProviders {
    pub model: ModelId,
    pub temperature: f32,
    pub max_tokens: u32,
    pub backend_url: String,
    pub completion_path: String,
    pub backend_headers: BTreeMap<String, String>,
    pub backend_timeout_secs: u64,
    pub embedded_enabled: bool,
    pub ollama_host: String,
    pub embedded_model: Option<ModelId>,
    pub embedded_timeout_secs: u64,
}

/// Resolve provider settings by priority:
/// 1. Explicit overrides (CLI flags)
/// 2. Environment variables
/// 3. .formulate/provider.json
/// 4. Compiled defaults
pub fn resolve_providers(
    config: &ProviderConfig,
    overrides: &ProviderOverrides,
) -> ResolvedProviders {
    let backend = config.merged_settings("backend");
    let embedded = config.merged_settings("embedded");

    let model = overrides
        .model
        .clone()
        .or_else(|| env_value("MODEL").map(ModelId::new))
        .or_else(|| backend.model.clone().map(ModelId::new))
        .unwrap_or_default();

    let backend_url = overrides
        .backend_url
        .clone()
        .or_else(|| env_value("FORMULATE_BACKEND_URL"))
        .or_else(|| backend.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

    let completion_path = env_value("FORMULATE_COMPLETION_PATH")
        .or_else(|| backend.extra_str("completion_path"))
        .unwrap_or_else(|| DEFAULT_COMPLETION_PATH.to_string());

    let mut backend_headers = backend.headers.clone();
    if let Some(key) = env_value("FORMULATE_API_KEY") {
        backend_headers.insert("Authorization".to_string(), format!("Bearer {key}"));
    }

    let embedded_enabled = overrides
        .embedded
        .or_else(|| env_value("FORMULATE_EMBEDDED").map(|v| v == "1" || v.eq_ignore_ascii_case("true")))
        .or(embedded.enabled)
        .unwrap_or(false);

    let ollama_host = env_value("OLLAMA_HOST")
        .or_else(|| embedded.base_url.clone())
        .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());

    let embedded_model = env_value("OLLAMA_MODEL")
        .or_else(|| embedded.model.clone())
        .map(ModelId::new);

    ResolvedProviders {
        model,
        temperature: backend.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: backend.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        backend_url,
        completion_path,
        backend_headers,
        backend_timeout_secs: backend.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        embedded_enabled,
        ollama_host,
        embedded_model,
        embedded_timeout_secs: embedded.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    }
}

/// Build the invocation selector: the embedded path first when enabled,
/// the backend always last.
pub fn build_selector(resolved: &ResolvedProviders) -> Result<InvocationSelector, ProviderError> {
    let backend = BackendProvider::new(
        &resolved.backend_url,
        &resolved.completion_path,
        resolved.backend_headers.clone(),
        resolved.backend_timeout_secs,
    )?;
    backend.validate_config()?;

    let mut selector = InvocationSelector::new(Arc::new(backend));

    if resolved.embedded_enabled {
        let capability = OllamaCapability::new(
            &resolved.ollama_host,
            Some(
                resolved
                    .embedded_model
                    .clone()
                    .unwrap_or_else(ModelId::llama2),
            ),
            true,
            resolved.embedded_timeout_secs,
        )?;
        selector = selector.with_embedded(Arc::new(EmbeddedProvider::new(Arc::new(capability))));
    }

    Ok(selector)
}

/// Load `.env` and the provider config file, then build a selector.
pub fn create_selector_with_overrides(
    overrides: ProviderOverrides,
) -> Result<(InvocationSelector, ResolvedProviders), ProviderError> {
    let _ = dotenvy::dotenv();

    let config = ProviderConfig::load()
        .map_err(|err| ProviderError::Config(format!("provider config: {err}")))?;
    let resolved = resolve_providers(&config, &overrides);
    let selector = build_selector(&resolved)?;
    Ok((selector, resolved))
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
