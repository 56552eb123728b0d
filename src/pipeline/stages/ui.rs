use crate::errors::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{Artifact, ArtifactKind, StageOutcome, UiLayout};

use super::{StageRuntime, decode, json_block};

/// Stage 5: propose a layout for presenting the result.
pub struct UiStage {
    runtime: StageRuntime,
}

impl UiStage {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    fn prompt(ctx: &PipelineContext) -> Result<String, StageError> {
        let formulation = ctx.require_formulation()?;
        let calculation = ctx.require_calculation()?;
        let validation = ctx.require_validation()?;

        Ok(format!(
            "Design a dashboard layout presenting the formulation \"{}\" ({} ingredients, {} scaled lines) \
             and its validation result.\n\nValidation:\n{}\n\n\
             Return a JSON object with this shape:\n\
             {{\"layout\": string, \"components\": [{{\"type\": string, \"title\": string, \"dataSource\": string}}]}}\n\
             Valid dataSource values: recipe, calculation, graph, validation.",
            formulation.name,
            formulation.ingredients.len(),
            calculation.scaled_ingredients.len(),
            json_block(validation)
        ))
    }
}

fn check_layout(layout: &UiLayout) -> Result<(), StageError> {
    if layout.layout.trim().is_empty() {
        return Err(StageError::incomplete(ArtifactKind::UiLayout, "no layout"));
    }
    if layout.components.is_empty() {
        return Err(StageError::incomplete(ArtifactKind::UiLayout, "no components"));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Stage for UiStage {
    fn name(&self) -> &str {
        "ui"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Formulation,
            ArtifactKind::Calculation,
            ArtifactKind::Validation,
        ]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::UiLayout
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        let value = self.runtime.ask(Self::prompt(ctx)?).await?;
        let layout: UiLayout = decode(ArtifactKind::UiLayout, value)?;
        check_layout(&layout)?;
        Ok(StageOutcome::success(Artifact::UiLayout(layout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layout_needs_components() {
        let layout: UiLayout =
            decode(ArtifactKind::UiLayout, json!({"layout": "grid", "components": []})).unwrap();
        assert_eq!(
            check_layout(&layout).unwrap_err().to_string(),
            "incomplete ui layout response: no components"
        );

        let layout: UiLayout = decode(
            ArtifactKind::UiLayout,
            json!({"layout": "grid", "components": [{"type": "table"}], "theme": "light"}),
        )
        .unwrap();
        assert!(check_layout(&layout).is_ok());
        assert_eq!(layout.extra["theme"], "light");
    }
}
