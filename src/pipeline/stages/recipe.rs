use crate::errors::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{Artifact, ArtifactKind, Formulation, StageMetadata, StageOutcome};

use super::{StageRuntime, decode, json_block};

/// Allowed distance of the ingredient percentage sum from 100.
pub const PERCENTAGE_TOLERANCE: f64 = 0.5;

/// Stage 1: turn the user's request into a formulation.
pub struct RecipeStage {
    runtime: StageRuntime,
}

impl RecipeStage {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    fn prompt(ctx: &PipelineContext) -> String {
        let config = ctx.config();
        let mut prompt = format!(
            "Create a product formulation for the following request.\n\n\
             Request: {}\n\
             Target batch: {} {}\n",
            config.user_request.trim(),
            config.target_batch_size,
            config.target_unit
        );
        if config.include_costs {
            prompt.push_str("Include an estimated costPerKg for every ingredient.\n");
        }
        if config.include_nutrients {
            prompt.push_str("Keep nutritional balance in mind when choosing ingredients.\n");
        }
        if let Some(hints) = ctx.hint_summary() {
            prompt.push_str(&format!("\nReference data:\n{}\n", json_block(&hints)));
        }
        prompt.push_str(
            "\nReturn a JSON object with this shape:\n\
             {\"name\": string, \"description\": string, \
             \"ingredients\": [{\"name\": string, \"percentage\": number, \"function\": string, \"costPerKg\": number}], \
             \"totalPercentage\": number}\n\
             Ingredient percentages must add up to 100.",
        );
        prompt
    }

    fn reasoning_prompt(ctx: &PipelineContext, formulation: &Formulation) -> String {
        format!(
            "In two or three sentences, explain why this formulation fits the request \"{}\".\n\n{}",
            ctx.user_request().trim(),
            json_block(formulation)
        )
    }
}

/// Shape checks on a decoded formulation. Returns non-fatal warnings.
pub(crate) fn check_formulation(formulation: &Formulation) -> Result<Vec<String>, StageError> {
    if formulation.name.trim().is_empty() {
        return Err(StageError::incomplete(
            ArtifactKind::Formulation,
            "formulation has no name",
        ));
    }
    if formulation.ingredients.is_empty() {
        return Err(StageError::incomplete(
            ArtifactKind::Formulation,
            "no ingredients",
        ));
    }
    if formulation
        .ingredients
        .iter()
        .any(|ingredient| ingredient.name.trim().is_empty())
    {
        return Err(StageError::incomplete(
            ArtifactKind::Formulation,
            "ingredient without a name",
        ));
    }

    let mut warnings = Vec::new();
    let sum = formulation.percentage_sum();
    if (sum - 100.0).abs() > PERCENTAGE_TOLERANCE {
        warnings.push(format!("ingredient percentages sum to {sum:.2}, expected 100"));
    }
    Ok(warnings)
}

#[async_trait::async_trait]
impl Stage for RecipeStage {
    fn name(&self) -> &str {
        "recipe"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::Formulation
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        if ctx.user_request().trim().is_empty() {
            return Err(StageError::InvalidInput(
                "userRequest must not be empty".to_string(),
            ));
        }

        let value = self.runtime.ask(Self::prompt(ctx)).await?;
        let formulation: Formulation = decode(ArtifactKind::Formulation, value)?;
        let mut warnings = check_formulation(&formulation)?;

        let reasoning = match self
            .runtime
            .explain(Self::reasoning_prompt(ctx, &formulation))
            .await
        {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                log::warn!("recipe reasoning unavailable: {err}");
                warnings.push(format!("reasoning unavailable: {err}"));
                None
            }
        };

        Ok(
            StageOutcome::success(Artifact::Formulation(formulation)).with_metadata(StageMetadata {
                reasoning,
                warnings,
            }),
        )
    }
}
