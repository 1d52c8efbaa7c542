use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use skein_core::error::Result;
use skein_core::traits::ExecutionStore;
use skein_core::types::{ExecutionId, ExecutionStatus};

/// One step-output override submitted for a replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOverride {
    pub step_id: String,
    pub new_output: String,
}

/// The record of a planned replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub original_execution_id: ExecutionId,
    pub new_execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub modifications_applied: usize,
}

/// Derive a new execution from a source snapshot by overriding selected
/// step outputs.
///
/// The source snapshot is never mutated; the copy is persisted under a
/// fresh execution id with status `replaying`. Overrides naming unknown
/// step ids are logged and skipped so an authoring surface can submit
/// speculative edits. This version records the hypothetical outputs and
/// does not re-invoke downstream executors.
pub async fn plan_replay(
    store: &dyn ExecutionStore,
    source_id: &ExecutionId,
    overrides: &[StepOverride],
) -> Result<ReplayOutcome> {
    let mut snapshot = store.load_snapshot(source_id).await?;

    let mut applied: HashSet<String> = HashSet::new();
    for over in overrides {
        let mut matched = false;
        'nodes: for node in &mut snapshot.nodes {
            for step in &mut node.steps {
                if step.step_id == over.step_id {
                    step.output = over.new_output.clone();
                    matched = true;
                    break 'nodes;
                }
            }
        }
        if matched {
            applied.insert(over.step_id.clone());
        } else {
            warn!(step_id = %over.step_id, "Ignoring override for unknown step");
        }
    }

    // A node's final output tracks its last step; refresh it where the
    // last step was overridden
    for node in &mut snapshot.nodes {
        if let Some(last) = node.steps.last() {
            if applied.contains(&last.step_id) {
                node.final_output = last.output.clone();
            }
        }
    }

    let new_execution_id = ExecutionId::new();
    let workflow_id = snapshot.workflow_id.clone();
    snapshot.execution_id = new_execution_id.clone();

    store.create_execution(&new_execution_id, &workflow_id).await?;
    store
        .finalize_execution(&new_execution_id, ExecutionStatus::Replaying, &snapshot, None)
        .await?;

    info!(
        original = %source_id,
        replay = %new_execution_id,
        modifications = applied.len(),
        "Replay execution created"
    );

    Ok(ReplayOutcome {
        original_execution_id: source_id.clone(),
        new_execution_id,
        status: ExecutionStatus::Replaying,
        modifications_applied: applied.len(),
    })
}
