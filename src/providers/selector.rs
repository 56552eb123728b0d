use std::sync::Arc;

use crate::errors::ProviderError;

use super::{CompletionProvider, CompletionRequest, CompletionResult};

/// Typed result of trying one completion path.
#[derive(Debug)]
pub enum InvocationOutcome {
    Completed(CompletionResult),
    Failed {
        provider: String,
        error: ProviderError,
    },
}

/// Ordered list of completion paths. The embedded path, when configured,
/// goes first; the backend is always last and its failure is terminal.
#[derive(Clone)]
pub struct InvocationSelector {
    embedded: Option<Arc<dyn CompletionProvider>>,
    backend: Arc<dyn CompletionProvider>,
}

impl InvocationSelector {
    pub fn new(backend: Arc<dyn CompletionProvider>) -> Self {
        Self {
            embedded: None,
            backend,
        }
    }

    pub fn with_embedded(mut self, embedded: Arc<dyn CompletionProvider>) -> Self {
        self.embedded = Some(embedded);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers().map(|provider| provider.name()).collect()
    }

    fn providers(&self) -> impl Iterator<Item = &Arc<dyn CompletionProvider>> {
        self.embedded.iter().chain(std::iter::once(&self.backend))
    }

    /// Run `req` against each path in order and return the first
    /// completion. Only the backend's failure reaches the caller.
    pub async fn invoke(&self, req: &CompletionRequest) -> Result<CompletionResult, ProviderError> {
        req.validate()?;
        let effective = req.effective();

        if let Some(embedded) = &self.embedded {
            match Self::attempt(embedded.as_ref(), &effective).await {
                InvocationOutcome::Completed(result) => return Ok(result),
                InvocationOutcome::Failed { provider, error } => {
                    log::warn!("{provider} completion failed, falling back to backend: {error}");
                }
            }
        }

        match Self::attempt(self.backend.as_ref(), &effective).await {
            InvocationOutcome::Completed(result) => Ok(result),
            InvocationOutcome::Failed { error, .. } => Err(error),
        }
    }

    async fn attempt(provider: &dyn CompletionProvider, req: &CompletionRequest) -> InvocationOutcome {
        log::debug!("invoking {} (model {})", provider.name(), req.model);

        let call = provider.complete(req);
        let result = match req.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(deadline)),
            },
            None => call.await,
        };

        match result {
            Ok(result) => InvocationOutcome::Completed(result),
            Err(error) => InvocationOutcome::Failed {
                provider: provider.name().to_string(),
                error,
            },
        }
    }
}
