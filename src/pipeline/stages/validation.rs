use crate::errors::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{Artifact, ArtifactKind, StageMetadata, StageOutcome, ValidationReport};

use super::{StageRuntime, decode, json_block};

/// Stage 4: ask the model to review the formulation and its scaling.
///
/// A report with `valid: false` is still a successful stage; the verdict
/// is data for the caller, not a pipeline failure.
pub struct ValidationStage {
    runtime: StageRuntime,
}

impl ValidationStage {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    fn prompt(ctx: &PipelineContext) -> Result<String, StageError> {
        let config = ctx.config();
        let formulation = ctx.require_formulation()?;
        let calculation = ctx.require_calculation()?;
        let graph = ctx.require_graph()?;

        let mut focus = vec!["ingredient percentages add up to 100", "scaled quantities match the percentages"];
        if config.include_costs {
            focus.push("costs are consistent with costPerKg");
        }
        if config.include_nutrients {
            focus.push("the formulation is nutritionally plausible");
        }

        Ok(format!(
            "Review this formulation for the request \"{}\". Check that {}.\n\n\
             Formulation:\n{}\n\nScaled batch:\n{}\n\nGraph: {} nodes, {} edges.\n\n\
             Return a JSON object with this shape:\n\
             {{\"valid\": boolean, \"errors\": [string], \"warnings\": [string], \"suggestions\": [string]}}",
            config.user_request.trim(),
            focus.join("; "),
            json_block(formulation),
            json_block(calculation),
            graph.nodes.len(),
            graph.edges.len()
        ))
    }
}

#[async_trait::async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Formulation,
            ArtifactKind::Calculation,
            ArtifactKind::Graph,
        ]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::Validation
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        let value = self.runtime.ask(Self::prompt(ctx)?).await?;
        let report: ValidationReport = decode(ArtifactKind::Validation, value)?;

        let mut warnings = Vec::new();
        if !report.valid {
            log::info!("validation reported {} error(s)", report.errors.len());
            warnings.push("formulation was reported invalid".to_string());
        }

        Ok(
            StageOutcome::success(Artifact::Validation(report)).with_metadata(StageMetadata {
                reasoning: None,
                warnings,
            }),
        )
    }
}
