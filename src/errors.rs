use std::time::Duration;

use thiserror::Error;

use crate::pipeline::types::ArtifactKind;

/// Failure of a single outbound completion call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Embedded capability error: {0}")]
    Embedded(String),

    #[error("Embedded capability unavailable")]
    Unavailable,

    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid completion request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Raw text that could not be coerced into JSON.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("empty response")]
    Empty,

    #[error("{message} (near: {snippet})")]
    Malformed { message: String, snippet: String },
}

impl InterpretError {
    pub fn snippet(&self) -> Option<&str> {
        match self {
            InterpretError::Empty => None,
            InterpretError::Malformed { snippet, .. } => Some(snippet),
        }
    }
}

/// What the retry controller surfaces once it gives up.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Invocation(#[from] ProviderError),

    #[error(transparent)]
    Interpretation(#[from] InterpretError),

    #[error("no valid JSON produced")]
    NoValidJson,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Request(#[from] AttemptError),

    #[error("missing required artifact: {0}")]
    MissingArtifact(ArtifactKind),

    #[error("incomplete {artifact} response: {reason}")]
    Incomplete {
        artifact: ArtifactKind,
        reason: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StageError {
    pub fn incomplete(artifact: ArtifactKind, reason: impl Into<String>) -> Self {
        StageError::Incomplete {
            artifact,
            reason: reason.into(),
        }
    }
}

/// Orchestrator construction errors. Running a pipeline never fails with these.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    NoStages,

    #[error("stage '{stage}' requires {missing}, which no earlier stage produces")]
    UnknownStageOrder { stage: String, missing: ArtifactKind },
}
