use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::errors::{PipelineError, StageError};
use crate::types::RunId;

use super::context::PipelineContext;
use super::logging::PipelineLogger;
use super::stage::Stage;
use super::stages::{GraphStage, RecipeStage, ScalingStage, StageRuntime, UiStage, ValidationStage};
use super::types::{
    AgentHistoryEntry, PipelineConfig, PipelineResult, PipelineStatus, StageOutcome, StageStatus,
    ValidationReport,
};

/// Runs an ordered list of stages over one shared context.
///
/// Each run owns its context and history; the orchestrator itself holds
/// only the stage list and an optional journal, so one instance can serve
/// concurrent runs.
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    logger: Option<PipelineLogger>,
}

struct Halt {
    stage: String,
    error: String,
}

impl Orchestrator {
    /// Build an orchestrator, checking that every stage's required
    /// artifacts are produced by an earlier stage.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }

        for (index, stage) in stages.iter().enumerate() {
            for required in stage.requires() {
                let produced_earlier = stages[..index]
                    .iter()
                    .any(|earlier| earlier.produces() == *required);
                if !produced_earlier {
                    return Err(PipelineError::UnknownStageOrder {
                        stage: stage.name().to_string(),
                        missing: *required,
                    });
                }
            }
        }

        Ok(Self {
            stages,
            logger: None,
        })
    }

    /// The fixed five-stage pipeline: recipe, scaling, graph, validation, ui.
    pub fn standard(runtime: StageRuntime) -> Self {
        Self {
            stages: vec![
                Box::new(RecipeStage::new(runtime.clone())),
                Box::new(ScalingStage::new(runtime.clone())),
                Box::new(GraphStage::new(runtime.clone())),
                Box::new(ValidationStage::new(runtime.clone())),
                Box::new(UiStage::new(runtime)),
            ],
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    fn journal(&self, run_id: &RunId, step: &str, data: serde_json::Value) {
        if let Some(logger) = &self.logger {
            logger.record(run_id, step, data);
        }
    }

    /// Run every stage in order, halting at the first failure. Never fails:
    /// problems are reported through the result's status and history.
    pub async fn run(&self, config: PipelineConfig) -> PipelineResult {
        let run_id = RunId::generate();
        let started = Instant::now();
        let timestamp = Utc::now();

        self.journal(
            &run_id,
            "run_started",
            json!({
                "stages": self.stage_names(),
                "userRequest": config.user_request,
            }),
        );

        let mut ctx = PipelineContext::new(config);
        let mut history = Vec::with_capacity(self.stages.len());
        let mut stage_metadata = BTreeMap::new();
        let mut halt = None;

        for stage in &self.stages {
            let name = stage.name().to_string();
            log::info!("stage '{name}' started");
            self.journal(&run_id, "stage_started", json!({ "stage": name }));

            let stage_started = Instant::now();
            let stage_timestamp = Utc::now();

            let outcome = match stage.requires().iter().find(|kind| !ctx.has(**kind)) {
                Some(missing) => StageOutcome::failed(StageError::MissingArtifact(*missing).to_string()),
                None => match stage.execute(&ctx).await {
                    Ok(outcome) => outcome,
                    Err(err) => StageOutcome::failed(err.to_string()),
                },
            };
            let duration = stage_started.elapsed().as_millis() as u64;

            let error = match outcome {
                StageOutcome::Success { artifact, metadata } if artifact.kind() == stage.produces() => {
                    for warning in &metadata.warnings {
                        log::info!("stage '{name}': {warning}");
                    }
                    self.journal(
                        &run_id,
                        "stage_succeeded",
                        json!({
                            "stage": name,
                            "duration": duration,
                            "warnings": metadata.warnings,
                        }),
                    );
                    ctx.insert(artifact);
                    if !metadata.is_empty() {
                        stage_metadata.insert(name.clone(), metadata);
                    }
                    None
                }
                StageOutcome::Success { artifact, .. } => Some(format!(
                    "stage '{name}' produced {} instead of {}",
                    artifact.kind(),
                    stage.produces()
                )),
                StageOutcome::Failed { error } => Some(error),
            };

            history.push(AgentHistoryEntry {
                agent: name.clone(),
                status: if error.is_some() {
                    StageStatus::Failed
                } else {
                    StageStatus::Success
                },
                error: error.clone(),
                duration,
                timestamp: stage_timestamp,
            });

            if let Some(error) = error {
                log::warn!("pipeline halted at stage '{name}': {error}");
                self.journal(
                    &run_id,
                    "stage_failed",
                    json!({ "stage": name, "duration": duration, "error": error }),
                );
                halt = Some(Halt { stage: name, error });
                break;
            }
            log::info!("stage '{name}' finished in {duration}ms");
        }

        let (recipe, calculation, graph, validation, ui_config) = ctx.into_parts();
        let status = if halt.is_none() {
            PipelineStatus::Success
        } else {
            PipelineStatus::Failed
        };
        let validation = match &halt {
            Some(halt) => failed_validation(halt, validation),
            None => validation
                .unwrap_or_else(|| ValidationReport::invalid("pipeline has no validation stage")),
        };
        let total_duration = started.elapsed().as_millis() as u64;

        self.journal(
            &run_id,
            "run_finished",
            json!({
                "status": status,
                "stages_run": history.len(),
                "total_duration": total_duration,
            }),
        );

        PipelineResult {
            id: run_id,
            status,
            recipe,
            calculation,
            graph,
            validation,
            ui_config,
            agent_history: history,
            stage_metadata,
            total_duration,
            timestamp,
        }
    }
}

/// The validation artifact returned from a halted run: always invalid,
/// naming the failed stage, and keeping whatever a validation stage had
/// already reported.
fn failed_validation(halt: &Halt, produced: Option<ValidationReport>) -> ValidationReport {
    let reason = format!("Pipeline failed at stage '{}': {}", halt.stage, halt.error);
    match produced {
        Some(mut report) => {
            report.valid = false;
            report.errors.insert(0, reason);
            report
        }
        None => ValidationReport::invalid(reason),
    }
}
