use std::sync::{Arc, Mutex};

use formulate::errors::{ProviderError, StageError};
use formulate::pipeline::stages::{GraphStage, RecipeStage, UiStage, ValidationStage};
use formulate::pipeline::{
    ArtifactKind, Orchestrator, PipelineConfig, PipelineContext, PipelineLogger, PipelineStatus,
    Stage, StageOutcome, StageRuntime, StageSettings, StageStatus,
};
use formulate::providers::{
    CompletionProvider, CompletionRequest, CompletionResult, InvocationSelector,
};
use formulate::RetryController;
use formulate::config::DEFAULT_MAX_ATTEMPTS;

const FORMULATION: &str = r#"{"name": "Oat Granola", "description": "Crunchy breakfast granola",
  "ingredients": [
    {"name": "Rolled oats", "percentage": 60, "function": "base", "costPerKg": 1.2},
    {"name": "Honey", "percentage": 25, "function": "binder", "costPerKg": 6.0},
    {"name": "Almonds", "percentage": 15, "function": "texture", "costPerKg": 9.5}
  ],
  "totalPercentage": 100}"#;

const CALCULATION: &str = r#"```json
{"targetBatchSize": 50, "targetUnit": "kg", "scaledIngredients": [
  {"name": "Rolled oats", "quantity": 30, "unit": "kg", "cost": 36.0},
  {"name": "Honey", "quantity": 12.5, "unit": "kg", "cost": 75.0},
  {"name": "Almonds", "quantity": 7.5, "unit": "kg", "cost": 71.25}
], "totalCost": 182.25}
```"#;

const GRAPH: &str = r#"Here is the graph: {nodes: [{id: 'f', label: 'Oat Granola'}, {id: 'oats', name: 'Rolled oats'}],
  edges: [{from: 'f', to: 'oats', type: 'CONTAINS'}]}"#;

const VALIDATION: &str = r#"{"valid": true, "errors": [], "warnings": ["Honey content is high"]}"#;

const UI: &str = r#"{"layout": "two-column", "components": [
  {"type": "table", "title": "Ingredients", "dataSource": "recipe"},
  {"type": "badge", "title": "Validation", "dataSource": "validation"}
]}"#;

/// Answers each stage by recognizing its prompt. `overrides` replaces the
/// answer for the first prompt containing the key, consumed in order.
#[derive(Default)]
struct ScriptedBackend {
    calls: Arc<Mutex<usize>>,
    overrides: Mutex<Vec<(&'static str, Result<&'static str, u16>)>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn with_override(self, key: &'static str, reply: Result<&'static str, u16>) -> Self {
        self.overrides.lock().unwrap().push((key, reply));
        self
    }

    /// Fail every attempt the retry controller makes for the matching prompt.
    fn failing(self, key: &'static str, status: u16) -> Self {
        (0..DEFAULT_MAX_ATTEMPTS).fold(self, |backend, _| backend.with_override(key, Err(status)))
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedBackend {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResult, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        self.prompts.lock().unwrap().push(req.prompt.clone());

        let scripted = {
            let mut overrides = self.overrides.lock().unwrap();
            overrides
                .iter()
                .position(|(key, _)| req.prompt.contains(key))
                .map(|index| overrides.remove(index).1)
        };

        let reply = scripted.unwrap_or_else(|| {
            let prompt = req.prompt.as_str();
            Ok(if prompt.starts_with("In two or three sentences") {
                "Oats give structure while honey binds the clusters."
            } else if prompt.starts_with("Create a product formulation") {
                FORMULATION
            } else if prompt.starts_with("Scale this formulation") {
                CALCULATION
            } else if prompt.starts_with("Build a knowledge graph") {
                GRAPH
            } else if prompt.starts_with("Review this formulation") {
                VALIDATION
            } else if prompt.starts_with("Design a dashboard layout") {
                UI
            } else {
                ""
            })
        });

        match reply {
            Ok(text) => Ok(CompletionResult::new("backend", Some(text.to_string()))),
            Err(status) => Err(ProviderError::Backend {
                status,
                body: "scripted failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "backend"
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn runtime(backend: ScriptedBackend) -> StageRuntime {
    let selector = InvocationSelector::new(Arc::new(backend));
    StageRuntime::new(
        RetryController::new(Arc::new(selector)),
        StageSettings::default(),
    )
}

fn request() -> PipelineConfig {
    PipelineConfig::new("Crunchy oat granola for a cafe").with_batch(50.0, "kg")
}

#[tokio::test]
async fn all_five_stages_succeed() {
    let backend = ScriptedBackend::default();
    let calls = backend.calls.clone();
    let orchestrator = Orchestrator::standard(runtime(backend));

    let result = orchestrator.run(request()).await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.agent_history.len(), 5);
    assert!(result
        .agent_history
        .iter()
        .all(|entry| entry.status == StageStatus::Success && entry.error.is_none()));
    let names: Vec<&str> = result.agent_history.iter().map(|e| e.agent.as_str()).collect();
    assert_eq!(names, ["recipe", "scaling", "graph", "validation", "ui"]);

    let recipe = result.recipe.as_ref().unwrap();
    assert_eq!(recipe.ingredients.len(), 3);
    assert_eq!(result.calculation.as_ref().unwrap().total_cost, Some(182.25));
    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges[0].id, "edge::f::oats::CONTAINS");
    assert!(result.validation.valid);
    assert_eq!(result.ui_config.as_ref().unwrap().components.len(), 2);

    let reasoning = result.stage_metadata["recipe"].reasoning.as_deref();
    assert_eq!(reasoning, Some("Oats give structure while honey binds the clusters."));

    // five structured requests plus the recipe rationale
    assert_eq!(*calls.lock().unwrap(), 6);
}

struct UnavailableScaling;

#[async_trait::async_trait]
impl Stage for UnavailableScaling {
    fn name(&self) -> &str {
        "scaling"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Formulation]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::Calculation
    }

    async fn execute(&self, _ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        Err(StageError::Failed("Scaling service unavailable".to_string()))
    }
}

#[tokio::test]
async fn second_stage_failure_halts_the_run() {
    let backend = ScriptedBackend::default();
    let prompts = backend.prompts.clone();
    let runtime = runtime(backend);
    let orchestrator = Orchestrator::new(vec![
        Box::new(RecipeStage::new(runtime.clone())),
        Box::new(UnavailableScaling),
        Box::new(GraphStage::new(runtime.clone())),
        Box::new(ValidationStage::new(runtime.clone())),
        Box::new(UiStage::new(runtime)),
    ])
    .unwrap();

    let result = orchestrator.run(request()).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.agent_history.len(), 2);
    assert_eq!(result.agent_history[0].status, StageStatus::Success);
    assert_eq!(result.agent_history[1].status, StageStatus::Failed);
    assert_eq!(
        result.agent_history[1].error.as_deref(),
        Some("Scaling service unavailable")
    );

    assert!(!result.validation.valid);
    assert!(result.validation.errors[0].contains("Scaling service unavailable"));
    assert!(result.recipe.is_some());
    assert!(result.calculation.is_none());
    assert!(result.graph.is_none());
    assert!(result.ui_config.is_none());

    let prompts = prompts.lock().unwrap();
    assert!(prompts.iter().all(|p| !p.starts_with("Build a knowledge graph")));
}

#[tokio::test]
async fn failed_result_serializes_with_camel_case_fields() {
    let orchestrator = Orchestrator::standard(runtime(
        ScriptedBackend::default().failing("Scale this formulation", 503),
    ));
    let result = orchestrator.run(request()).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["status"], "failed");
    assert_eq!(json["agentHistory"].as_array().unwrap().len(), 2);
    assert_eq!(json["agentHistory"][1]["agent"], "scaling");
    assert_eq!(json["agentHistory"][1]["status"], "failed");
    assert_eq!(json["validation"]["valid"], false);
    assert!(json["calculation"].is_null());
    assert!(json["uiConfig"].is_null());
    assert!(json["totalDuration"].is_u64());
    assert!(json["id"].as_str().is_some_and(|id| id.len() == 36));
}

#[tokio::test]
async fn retry_recovers_within_a_stage() {
    let backend = ScriptedBackend::default()
        .with_override("Create a product formulation", Err(502))
        .with_override("Create a product formulation", Ok("I think you want granola!"));
    let calls = backend.calls.clone();
    let prompts = backend.prompts.clone();
    let orchestrator = Orchestrator::standard(runtime(backend));

    let result = orchestrator.run(request()).await;

    assert!(result.is_success());
    assert_eq!(result.agent_history[0].status, StageStatus::Success);
    assert_eq!(*calls.lock().unwrap(), 8);
    let prompts = prompts.lock().unwrap();
    assert!(prompts[2].contains("Your previous response was not valid JSON"));
}

#[tokio::test]
async fn exhausted_attempts_fail_the_stage_with_last_error() {
    let backend = ScriptedBackend::default()
        .with_override("Build a knowledge graph", Ok("no graph today"))
        .with_override("Build a knowledge graph", Ok("still nothing"))
        .with_override("Build a knowledge graph", Err(500));
    let orchestrator = Orchestrator::standard(runtime(backend));

    let result = orchestrator.run(request()).await;

    assert_eq!(result.agent_history.len(), 3);
    let failure = result.failure().unwrap();
    assert_eq!(failure.agent, "graph");
    assert_eq!(
        failure.error.as_deref(),
        Some("Backend returned 500: scripted failure")
    );
    assert!(result.calculation.is_some());
    assert!(result.graph.is_none());
}

#[tokio::test]
async fn empty_graph_is_a_stage_failure() {
    let backend = ScriptedBackend::default()
        .with_override("Build a knowledge graph", Ok(r#"{"nodes": [], "edges": []}"#));
    let result = Orchestrator::standard(runtime(backend)).run(request()).await;

    let failure = result.failure().unwrap();
    assert_eq!(failure.agent, "graph");
    assert_eq!(
        failure.error.as_deref(),
        Some("incomplete graph response: no nodes")
    );
}

#[tokio::test]
async fn model_reported_invalidity_is_not_a_failure() {
    let backend = ScriptedBackend::default().with_override(
        "Review this formulation",
        Ok(r#"{"valid": false, "errors": ["Almonds are an allergen"], "warnings": []}"#),
    );
    let result = Orchestrator::standard(runtime(backend)).run(request()).await;

    assert!(result.is_success());
    assert_eq!(result.agent_history.len(), 5);
    assert!(!result.validation.valid);
    assert_eq!(result.validation.errors, vec!["Almonds are an allergen"]);
}

#[tokio::test]
async fn empty_request_fails_first_stage() {
    let backend = ScriptedBackend::default();
    let calls = backend.calls.clone();
    let result = Orchestrator::standard(runtime(backend))
        .run(PipelineConfig::new("   "))
        .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.agent_history.len(), 1);
    assert_eq!(result.agent_history[0].agent, "recipe");
    assert!(!result.validation.valid);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn unbalanced_recipe_warns_but_continues() {
    let backend = ScriptedBackend::default().with_override(
        "Create a product formulation",
        Ok(r#"{"name": "Trail mix", "ingredients": [{"name": "Peanuts", "percentage": 70}]}"#),
    );
    let result = Orchestrator::standard(runtime(backend)).run(request()).await;

    assert!(result.is_success());
    let warnings = &result.stage_metadata["recipe"].warnings;
    assert!(warnings.iter().any(|w| w.contains("sum to 70.00")));
}

#[tokio::test]
async fn rationale_failure_only_warns() {
    let backend =
        ScriptedBackend::default().with_override("In two or three sentences", Err(503));
    let result = Orchestrator::standard(runtime(backend)).run(request()).await;

    assert!(result.is_success());
    let metadata = &result.stage_metadata["recipe"];
    assert!(metadata.reasoning.is_none());
    assert!(metadata.warnings[0].starts_with("reasoning unavailable"));
}

#[tokio::test]
async fn journal_records_each_event() {
    let dir = tempfile::tempdir().unwrap();
    let logger = PipelineLogger::new(dir.path()).unwrap();
    let orchestrator = Orchestrator::standard(runtime(
        ScriptedBackend::default().failing("Review this formulation", 503),
    ))
    .with_logger(logger);

    let result = orchestrator.run(request()).await;

    let journal = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let events: Vec<serde_json::Value> = journal
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let steps: Vec<&str> = events.iter().map(|e| e["step"].as_str().unwrap()).collect();
    assert_eq!(
        steps,
        [
            "run_started",
            "stage_started",
            "stage_succeeded",
            "stage_started",
            "stage_succeeded",
            "stage_started",
            "stage_succeeded",
            "stage_started",
            "stage_failed",
            "run_finished",
        ]
    );
    assert!(events.iter().all(|e| e["run_id"] == result.id.as_str()));
    assert_eq!(events[9]["data"]["status"], "failed");
}

#[tokio::test]
async fn concurrent_runs_do_not_share_state() {
    let orchestrator = Arc::new(Orchestrator::standard(runtime(ScriptedBackend::default())));
    let (a, b) = tokio::join!(
        orchestrator.run(request()),
        orchestrator.run(PipelineConfig::new(""))
    );
    assert!(a.is_success());
    assert_eq!(b.agent_history.len(), 1);
    assert_ne!(a.id, b.id);
}
