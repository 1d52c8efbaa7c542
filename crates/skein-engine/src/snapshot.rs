use std::collections::HashMap;

use chrono::{DateTime, Utc};

use skein_core::types::{ExecutionId, MetaInfo, NodeSnapshot, Snapshot, WorkflowId};

use crate::dag::Dag;
use crate::scheduler::NodeResult;

/// Collapse terminal node results into the persisted snapshot.
///
/// Invoked at run completion regardless of terminal status. Nodes appear in
/// the DAG's topological order; only nodes that reached a terminal state
/// are included, so a node stranded by an upstream failure never shows up.
/// Infallible by construction.
pub fn build_snapshot(
    workflow_id: &WorkflowId,
    execution_id: &ExecutionId,
    dag: &Dag,
    results: &HashMap<String, NodeResult>,
    cost_per_token: f64,
) -> Snapshot {
    let mut nodes = Vec::with_capacity(results.len());
    let mut total_tokens: u64 = 0;
    let mut first_start: Option<DateTime<Utc>> = None;
    let mut last_end: Option<DateTime<Utc>> = None;

    for node_id in dag.topological_sort() {
        let Some(result) = results.get(&node_id) else {
            continue;
        };

        for step in &result.steps {
            total_tokens += step.tokens;
            let start = step.timestamp;
            let end = start + chrono::Duration::milliseconds(step.latency_ms as i64);
            first_start = Some(first_start.map_or(start, |t| t.min(start)));
            last_end = Some(last_end.map_or(end, |t| t.max(end)));
        }

        // Last step's output on success, empty on failure
        let final_output = if result.succeeded() {
            result
                .steps
                .last()
                .map(|step| step.output.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        nodes.push(NodeSnapshot {
            node_id: result.node_id.clone(),
            agent_name: result.agent_name.clone(),
            steps: result.steps.clone(),
            final_output,
            extra: Default::default(),
        });
    }

    let duration_ms = match (first_start, last_end) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    };

    Snapshot {
        workflow_id: workflow_id.clone(),
        execution_id: execution_id.clone(),
        nodes,
        edges: dag.edges().to_vec(),
        execution_meta: MetaInfo {
            total_tokens,
            total_cost: total_tokens as f64 * cost_per_token,
            duration_ms,
        },
        extra: Default::default(),
    }
}
