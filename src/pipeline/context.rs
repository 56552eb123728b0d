use serde_json::{Map, Value};

use crate::errors::StageError;

use super::types::{
    Artifact, ArtifactKind, Calculation, Formulation, GraphArtifact, PipelineConfig, UiLayout,
    ValidationReport,
};

const HINT_MAX_KEYS: usize = 8;
const HINT_MAX_DEPTH: usize = 2;
const HINT_MAX_ITEMS: usize = 5;
const HINT_MAX_STRING: usize = 512;

/// Read-only view handed to each stage: the caller's request plus every
/// artifact produced so far. Only the orchestrator inserts artifacts.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    config: PipelineConfig,
    formulation: Option<Formulation>,
    calculation: Option<Calculation>,
    graph: Option<GraphArtifact>,
    validation: Option<ValidationReport>,
    ui_layout: Option<UiLayout>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            formulation: None,
            calculation: None,
            graph: None,
            validation: None,
            ui_layout: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn user_request(&self) -> &str {
        &self.config.user_request
    }

    pub fn formulation(&self) -> Option<&Formulation> {
        self.formulation.as_ref()
    }

    pub fn calculation(&self) -> Option<&Calculation> {
        self.calculation.as_ref()
    }

    pub fn graph(&self) -> Option<&GraphArtifact> {
        self.graph.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    pub fn ui_layout(&self) -> Option<&UiLayout> {
        self.ui_layout.as_ref()
    }

    pub fn has(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Formulation => self.formulation.is_some(),
            ArtifactKind::Calculation => self.calculation.is_some(),
            ArtifactKind::Graph => self.graph.is_some(),
            ArtifactKind::Validation => self.validation.is_some(),
            ArtifactKind::UiLayout => self.ui_layout.is_some(),
        }
    }

    pub fn require_formulation(&self) -> Result<&Formulation, StageError> {
        self.formulation()
            .ok_or(StageError::MissingArtifact(ArtifactKind::Formulation))
    }

    pub fn require_calculation(&self) -> Result<&Calculation, StageError> {
        self.calculation()
            .ok_or(StageError::MissingArtifact(ArtifactKind::Calculation))
    }

    pub fn require_graph(&self) -> Result<&GraphArtifact, StageError> {
        self.graph()
            .ok_or(StageError::MissingArtifact(ArtifactKind::Graph))
    }

    pub fn require_validation(&self) -> Result<&ValidationReport, StageError> {
        self.validation()
            .ok_or(StageError::MissingArtifact(ArtifactKind::Validation))
    }

    /// Bounded summary of the caller's context hints, ready to embed in a prompt.
    pub fn hint_summary(&self) -> Option<Value> {
        if self.config.context.is_empty() {
            return None;
        }
        Some(summarize_hints(&self.config.context))
    }

    pub(crate) fn insert(&mut self, artifact: Artifact) {
        match artifact {
            Artifact::Formulation(value) => self.formulation = Some(value),
            Artifact::Calculation(value) => self.calculation = Some(value),
            Artifact::Graph(value) => self.graph = Some(value),
            Artifact::Validation(value) => self.validation = Some(value),
            Artifact::UiLayout(value) => self.ui_layout = Some(value),
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<Formulation>,
        Option<Calculation>,
        Option<GraphArtifact>,
        Option<ValidationReport>,
        Option<UiLayout>,
    ) {
        (
            self.formulation,
            self.calculation,
            self.graph,
            self.validation,
            self.ui_layout,
        )
    }
}

/// Keep at most 8 top-level keys, two levels of nesting, 5 items per
/// nested container and 512 characters per string.
pub fn summarize_hints(hints: &Map<String, Value>) -> Value {
    let summary = hints
        .iter()
        .take(HINT_MAX_KEYS)
        .map(|(key, value)| (key.clone(), summarize_value(value, 1)))
        .collect();
    Value::Object(summary)
}

fn summarize_value(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_hint(text)),
        Value::Array(items) => {
            if depth >= HINT_MAX_DEPTH {
                return Value::String(format!("<list length={}>", items.len()));
            }
            Value::Array(
                items
                    .iter()
                    .take(HINT_MAX_ITEMS)
                    .map(|item| summarize_value(item, depth + 1))
                    .collect(),
            )
        }
        Value::Object(map) => {
            if depth >= HINT_MAX_DEPTH {
                return Value::Object(
                    map.keys()
                        .take(HINT_MAX_ITEMS)
                        .map(|key| (key.clone(), Value::String("<truncated>".to_string())))
                        .collect(),
                );
            }
            Value::Object(
                map.iter()
                    .take(HINT_MAX_ITEMS)
                    .map(|(key, item)| (key.clone(), summarize_value(item, depth + 1)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn truncate_hint(text: &str) -> String {
    if text.chars().count() <= HINT_MAX_STRING {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(HINT_MAX_STRING).collect();
    cut.push_str("...");
    cut
}
