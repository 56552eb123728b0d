use serde_json::{Value, json};

use crate::errors::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{Artifact, ArtifactKind, Calculation, StageMetadata, StageOutcome};

use super::{StageRuntime, decode, json_block};

/// Stage 2: scale the formulation to the requested batch.
pub struct ScalingStage {
    runtime: StageRuntime,
}

impl ScalingStage {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    fn prompt(ctx: &PipelineContext) -> Result<String, StageError> {
        let config = ctx.config();
        let formulation = ctx.require_formulation()?;

        let mut prompt = format!(
            "Scale this formulation to a batch of {} {}.\n\nFormulation:\n{}\n",
            config.target_batch_size,
            config.target_unit,
            json_block(formulation)
        );
        if config.include_costs {
            prompt.push_str(
                "Compute a cost for every scaled ingredient from its costPerKg, and a totalCost.\n",
            );
        }
        if let Some(hints) = ctx.hint_summary() {
            prompt.push_str(&format!(
                "\nReference data (prefer these costs and densities):\n{}\n",
                json_block(&hints)
            ));
        }
        prompt.push_str(
            "\nReturn a JSON object with this shape:\n\
             {\"targetBatchSize\": number, \"targetUnit\": string, \
             \"scaledIngredients\": [{\"name\": string, \"percentage\": number, \"quantity\": number, \"unit\": string, \"cost\": number}], \
             \"totalCost\": number}",
        );
        Ok(prompt)
    }
}

/// Fill batch fields the model left out from the caller's configuration.
fn with_batch_defaults(mut value: Value, ctx: &PipelineContext) -> Value {
    if let Value::Object(map) = &mut value
        && !map.contains_key("error")
    {
        let config = ctx.config();
        map.entry("targetBatchSize")
            .or_insert_with(|| json!(config.target_batch_size));
        map.entry("targetUnit")
            .or_insert_with(|| json!(config.target_unit));
    }
    value
}

fn check_calculation(calculation: &Calculation) -> Result<Vec<String>, StageError> {
    if calculation.scaled_ingredients.is_empty() {
        return Err(StageError::incomplete(
            ArtifactKind::Calculation,
            "no scaled ingredients",
        ));
    }

    let mut warnings = Vec::new();
    let negative: Vec<&str> = calculation
        .scaled_ingredients
        .iter()
        .filter(|ingredient| ingredient.quantity < 0.0)
        .map(|ingredient| ingredient.name.as_str())
        .collect();
    if !negative.is_empty() {
        warnings.push(format!("negative quantities for: {}", negative.join(", ")));
    }
    Ok(warnings)
}

#[async_trait::async_trait]
impl Stage for ScalingStage {
    fn name(&self) -> &str {
        "scaling"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Formulation]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::Calculation
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        let value = self.runtime.ask(Self::prompt(ctx)?).await?;
        let calculation: Calculation =
            decode(ArtifactKind::Calculation, with_batch_defaults(value, ctx))?;
        let warnings = check_calculation(&calculation)?;

        Ok(
            StageOutcome::success(Artifact::Calculation(calculation)).with_metadata(StageMetadata {
                reasoning: None,
                warnings,
            }),
        )
    }
}
