pub mod context;
pub mod logging;
pub mod orchestrator;
pub mod stage;
pub mod stages;
pub mod types;

pub use context::{PipelineContext, summarize_hints};
pub use logging::PipelineLogger;
pub use orchestrator::Orchestrator;
pub use stage::Stage;
pub use stages::{StageRuntime, StageSettings};
pub use types::{
    AgentHistoryEntry, Artifact, ArtifactKind, Calculation, Formulation, GraphArtifact,
    PipelineConfig, PipelineResult, PipelineStatus, StageMetadata, StageOutcome, StageStatus,
    UiLayout, ValidationReport,
};
