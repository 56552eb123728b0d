use crate::errors::StageError;

use super::context::PipelineContext;
use super::types::{ArtifactKind, StageOutcome};

/// One unit of pipeline work: reads prior artifacts from the context and
/// produces exactly one new artifact.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Name recorded in the run history.
    fn name(&self) -> &str;

    /// Artifacts that must exist before this stage may run.
    fn requires(&self) -> &'static [ArtifactKind];

    fn produces(&self) -> ArtifactKind;

    /// Run the stage. `Err` and `StageOutcome::Failed` are both stage
    /// failures; the orchestrator records either the same way.
    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError>;
}
