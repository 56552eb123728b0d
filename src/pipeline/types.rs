use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_UNIT};
use crate::types::RunId;

/// Options accepted by the pipeline entry point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub user_request: String,
    #[serde(default = "default_batch_size")]
    pub target_batch_size: f64,
    #[serde(default = "default_unit")]
    pub target_unit: String,
    #[serde(default)]
    pub include_nutrients: bool,
    #[serde(default = "default_true")]
    pub include_costs: bool,
    /// Free-form domain hints, e.g. cost or density lookups by ingredient name.
    #[serde(default)]
    pub context: Map<String, Value>,
}

fn default_batch_size() -> f64 {
    DEFAULT_BATCH_SIZE
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    pub fn new(user_request: impl Into<String>) -> Self {
        Self {
            user_request: user_request.into(),
            target_batch_size: DEFAULT_BATCH_SIZE,
            target_unit: DEFAULT_UNIT.to_string(),
            include_nutrients: false,
            include_costs: true,
            context: Map::new(),
        }
    }

    pub fn with_batch(mut self, size: f64, unit: impl Into<String>) -> Self {
        self.target_batch_size = size;
        self.target_unit = unit.into();
        self
    }

    pub fn with_nutrients(mut self, include: bool) -> Self {
        self.include_nutrients = include;
        self
    }

    pub fn with_costs(mut self, include: bool) -> Self {
        self.include_costs = include;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Formulation,
    Calculation,
    Graph,
    Validation,
    UiLayout,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Formulation => "formulation",
            ArtifactKind::Calculation => "calculation",
            ArtifactKind::Graph => "graph",
            ArtifactKind::Validation => "validation",
            ArtifactKind::UiLayout => "ui layout",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_kg: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 1 artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formulation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ingredients: Vec<Ingredient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_percentage: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Formulation {
    pub fn percentage_sum(&self) -> f64 {
        self.ingredients.iter().map(|i| i.percentage).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaledIngredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 2 artifact: quantities for the requested batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calculation {
    pub target_batch_size: f64,
    pub target_unit: String,
    pub scaled_ingredients: Vec<ScaledIngredient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

/// Stage 3 artifact, already normalized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphArtifact {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Stage 4 artifact. Also synthesized by the orchestrator when a run fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ValidationReport {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![reason.into()],
            warnings: Vec::new(),
            suggestions: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Stage 5 artifact: how a client should lay the result out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiLayout {
    pub layout: String,
    pub components: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    Formulation(Formulation),
    Calculation(Calculation),
    Graph(GraphArtifact),
    Validation(ValidationReport),
    UiLayout(UiLayout),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Formulation(_) => ArtifactKind::Formulation,
            Artifact::Calculation(_) => ArtifactKind::Calculation,
            Artifact::Graph(_) => ArtifactKind::Graph,
            Artifact::Validation(_) => ArtifactKind::Validation,
            Artifact::UiLayout(_) => ArtifactKind::UiLayout,
        }
    }
}

/// Free-form side information a stage reports with its artifact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StageMetadata {
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_none() && self.warnings.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome {
    Success {
        artifact: Artifact,
        metadata: StageMetadata,
    },
    Failed {
        error: String,
    },
}

impl StageOutcome {
    pub fn success(artifact: Artifact) -> Self {
        StageOutcome::Success {
            artifact,
            metadata: StageMetadata::default(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        StageOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn with_metadata(self, metadata: StageMetadata) -> Self {
        match self {
            StageOutcome::Success { artifact, .. } => StageOutcome::Success { artifact, metadata },
            failed => failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
}

/// One line of the run's audit trail. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds spent in the stage.
    pub duration: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub id: RunId,
    pub status: PipelineStatus,
    pub recipe: Option<Formulation>,
    pub calculation: Option<Calculation>,
    pub graph: Option<GraphArtifact>,
    pub validation: ValidationReport,
    pub ui_config: Option<UiLayout>,
    pub agent_history: Vec<AgentHistoryEntry>,
    /// Reasoning and warnings reported by successful stages, by stage name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_metadata: BTreeMap<String, StageMetadata>,
    /// Milliseconds for the whole run.
    pub total_duration: u64,
    pub timestamp: DateTime<Utc>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// The failed history entry, if the run halted.
    pub fn failure(&self) -> Option<&AgentHistoryEntry> {
        self.agent_history
            .last()
            .filter(|entry| entry.status == StageStatus::Failed)
    }
}
