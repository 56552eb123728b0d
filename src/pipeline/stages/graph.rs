use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::errors::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{
    Artifact, ArtifactKind, GraphArtifact, GraphEdge, GraphNode, StageMetadata, StageOutcome,
};

use super::{StageRuntime, json_block, reported_error};

const DEFAULT_EDGE_TYPE: &str = "RELATED";

/// Stage 3: describe the formulation as a node/edge graph.
pub struct GraphStage {
    runtime: StageRuntime,
}

impl GraphStage {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    fn prompt(ctx: &PipelineContext) -> Result<String, StageError> {
        let formulation = ctx.require_formulation()?;
        let calculation = ctx.require_calculation()?;
        Ok(format!(
            "Build a knowledge graph for this formulation and its scaled batch.\n\
             Use one node for the formulation, one per ingredient, and one per ingredient function; \
             connect them with typed edges such as CONTAINS and HAS_FUNCTION.\n\n\
             Formulation:\n{}\n\nScaled batch:\n{}\n\n\
             Return a JSON object with this shape:\n\
             {{\"nodes\": [{{\"id\": string, \"label\": string, \"type\": string, \"properties\": object}}], \
             \"edges\": [{{\"source\": string, \"target\": string, \"type\": string, \"properties\": object}}]}}",
            json_block(formulation),
            json_block(calculation)
        ))
    }
}

/// Coerce loosely shaped graph JSON into a [`GraphArtifact`].
///
/// Nodes need an `id` (or `nodeId`); labels fall back from `label` to
/// `name` to `properties.name`, then to the id. Edges accept
/// `source`/`from` and `target`/`to`, default their type to `RELATED` and
/// get the id `edge::<source>::<target>::<type>` when none is given.
/// Anything missing an identifier or an endpoint is dropped.
pub fn normalize_graph(value: &Value) -> GraphArtifact {
    let nodes: Vec<GraphNode> = items(value, "nodes").filter_map(normalize_node).collect();
    let edges = items(value, "edges")
        .filter_map(normalize_edge)
        .fold(Vec::new(), |mut edges: Vec<GraphEdge>, edge| {
            if !edges.iter().any(|existing| existing.id == edge.id) {
                edges.push(edge);
            }
            edges
        });

    let mut seen = HashSet::new();
    let nodes = nodes
        .into_iter()
        .filter(|node| seen.insert(node.id.clone()))
        .collect();

    GraphArtifact { nodes, edges }
}

fn items<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn normalize_node(raw: &Map<String, Value>) -> Option<GraphNode> {
    let id = identifier(raw.get("id")).or_else(|| identifier(raw.get("nodeId")))?;
    let properties = raw
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let label = text(raw.get("label"))
        .or_else(|| text(raw.get("name")))
        .or_else(|| text(properties.get("name")))
        .unwrap_or_else(|| id.clone());

    Some(GraphNode {
        id,
        label,
        node_type: text(raw.get("type")),
        properties,
    })
}

fn normalize_edge(raw: &Map<String, Value>) -> Option<GraphEdge> {
    let source = identifier(raw.get("source")).or_else(|| identifier(raw.get("from")))?;
    let target = identifier(raw.get("target")).or_else(|| identifier(raw.get("to")))?;
    let edge_type = text(raw.get("type")).unwrap_or_else(|| DEFAULT_EDGE_TYPE.to_string());
    let id = identifier(raw.get("id"))
        .unwrap_or_else(|| format!("edge::{source}::{target}::{edge_type}"));

    Some(GraphEdge {
        id,
        source,
        target,
        edge_type,
        properties: raw
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

fn identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        other => text(Some(other)),
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl Stage for GraphStage {
    fn name(&self) -> &str {
        "graph"
    }

    fn requires(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Formulation, ArtifactKind::Calculation]
    }

    fn produces(&self) -> ArtifactKind {
        ArtifactKind::Graph
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageOutcome, StageError> {
        let value = self.runtime.ask(Self::prompt(ctx)?).await?;
        if let Some(reason) = reported_error(&value) {
            return Err(StageError::Failed(format!(
                "model declined the graph request: {reason}"
            )));
        }

        let graph = normalize_graph(&value);
        if graph.nodes.is_empty() {
            return Err(StageError::incomplete(ArtifactKind::Graph, "no nodes"));
        }

        let mut warnings = Vec::new();
        let ids: HashSet<&str> = graph.nodes.iter().map(|node| node.id.as_str()).collect();
        let dangling = graph
            .edges
            .iter()
            .filter(|edge| !ids.contains(edge.source.as_str()) || !ids.contains(edge.target.as_str()))
            .count();
        if dangling > 0 {
            warnings.push(format!("{dangling} edge(s) reference unknown nodes"));
        }

        Ok(
            StageOutcome::success(Artifact::Graph(graph)).with_metadata(StageMetadata {
                reasoning: None,
                warnings,
            }),
        )
    }
}
