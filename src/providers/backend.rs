use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ProviderError;
use crate::sanitize::{LOG_BODY_LIMIT, sanitize_preview};

use super::{CompletionProvider, CompletionRequest, CompletionResult, ProviderHttpClient};

/// Wire body of the backend completion endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendCompletionBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    temperature: f32,
    max_tokens: u32,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct BackendCompletionResponse {
    #[serde(default)]
    completion: Option<String>,
}

/// Completion over the configured HTTP backend.
pub struct BackendProvider {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl BackendProvider {
    pub fn new(
        base_url: &str,
        completion_path: &str,
        headers: BTreeMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = ProviderHttpClient::new(timeout_secs)?.into_client();
        let endpoint = join_url(base_url, completion_path);

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ProviderError::Config(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|err| ProviderError::Config(format!("invalid value for header '{name}': {err}")))?;
            header_map.insert(name, value);
        }

        Ok(Self {
            client,
            endpoint,
            headers: header_map,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl CompletionProvider for BackendProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResult, ProviderError> {
        let body = BackendCompletionBody {
            prompt: &req.prompt,
            system_prompt: req.system.as_deref(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            model: req.model.as_str(),
        };

        let res = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            let preview = sanitize_preview(&err_text, LOG_BODY_LIMIT);
            log::error!("backend completion failed with {status}: {preview}");
            return Err(ProviderError::Backend {
                status: status.as_u16(),
                body: preview,
            });
        }

        let response: BackendCompletionResponse = res
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(format!("backend reply: {err}")))?;

        Ok(CompletionResult::new(
            self.name(),
            Some(response.completion.unwrap_or_default()),
        ))
    }

    fn name(&self) -> &str {
        "backend"
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ProviderError::Config(format!(
                "backend URL must be http(s): {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("http://localhost:8000/", "/api/ai/completion"),
            "http://localhost:8000/api/ai/completion"
        );
        assert_eq!(join_url("http://h", "health"), "http://h/health");
    }

    #[test]
    fn body_uses_camel_case_fields() {
        let req = CompletionRequest::new("scale it").with_system("be brief");
        let body = BackendCompletionBody {
            prompt: &req.prompt,
            system_prompt: req.system.as_deref(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            model: req.model.as_str(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["prompt"], "scale it");
        assert_eq!(json["systemPrompt"], "be brief");
        assert_eq!(json["maxTokens"], 800);
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn rejects_invalid_header() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);
        let result = BackendProvider::new("http://localhost:8000", "/c", headers, 5);
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[test]
    fn validate_config_requires_http_scheme() {
        let provider = BackendProvider::new("ftp://host", "/c", BTreeMap::new(), 5).unwrap();
        assert!(provider.validate_config().is_err());

        let provider = BackendProvider::new("https://host", "/c", BTreeMap::new(), 5).unwrap();
        assert!(provider.validate_config().is_ok());
        assert_eq!(provider.endpoint(), "https://host/c");
    }
}
