use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skein_core::config::RuntimeConfig;
use skein_core::error::Result;
use skein_core::traits::{AgentStore, EventSink, ExecutionStore};
use skein_core::types::{
    ExecutionId, ExecutionStatus, RunSummary, Snapshot, Workflow,
};
use skein_executors::ExecutorRegistry;

use crate::dag::Dag;
use crate::scheduler::Scheduler;
use crate::snapshot::build_snapshot;

/// The outcome of one driven execution.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub snapshot: Snapshot,
}

/// Glues the execution core to its collaborators.
///
/// For each run: create the execution record, materialize the DAG, drive
/// the scheduler while pumping its events to the sink, build the snapshot
/// regardless of terminal status, emit the `execution_complete` sentinel,
/// and finalize the record exactly once.
pub struct WorkflowRuntime {
    agents: Arc<dyn AgentStore>,
    executors: Arc<ExecutorRegistry>,
    store: Arc<dyn ExecutionStore>,
    sink: Arc<dyn EventSink>,
    config: RuntimeConfig,
}

impl WorkflowRuntime {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        executors: Arc<ExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            agents,
            executors,
            store,
            sink,
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a workflow under a fresh execution id.
    ///
    /// Node failures do not surface as an error here: they are reflected in
    /// the returned `status`, the way a polling or subscribing caller sees
    /// them. Errors are reserved for rejected graphs and persistence
    /// failures.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial_input: Option<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome> {
        self.execute_with_id(ExecutionId::new(), workflow, initial_input, cancel)
            .await
    }

    /// Execute a workflow under a caller-supplied execution id, so callers
    /// can hand the id to subscribers before the run starts.
    pub async fn execute_with_id(
        &self,
        execution_id: ExecutionId,
        workflow: &Workflow,
        initial_input: Option<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let dag = Dag::from_workflow(workflow)?;

        self.store.create_execution(&execution_id, &workflow.id).await?;
        info!(execution_id = %execution_id, workflow_id = %workflow.id, "Execution created");

        let (scheduler, mut events) = Scheduler::new(
            dag,
            Arc::clone(&self.agents),
            Arc::clone(&self.executors),
            execution_id.clone(),
            &self.config,
        );

        let sink = Arc::clone(&self.sink);
        let pump_id = execution_id.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                sink.publish(&pump_id, &event);
            }
        });

        let run_result = scheduler.run(cancel, initial_input.as_ref()).await;
        let status = match run_result {
            Ok(()) => ExecutionStatus::Success,
            Err(error) => {
                warn!(execution_id = %execution_id, error = %error, "Run ended with failures");
                ExecutionStatus::Failed
            }
        };

        let results = scheduler.take_results();
        let snapshot = build_snapshot(
            &workflow.id,
            &execution_id,
            scheduler.dag(),
            &results,
            self.config.cost_per_token,
        );

        // Sentinel: emitted after run() returned, so every per-node event
        // is already ahead of it on the channel; dropping the scheduler
        // then closes the channel and lets the pump drain out.
        scheduler
            .finish(RunSummary {
                status,
                execution_meta: snapshot.execution_meta.clone(),
            })
            .await;
        drop(scheduler);
        let _ = pump.await;

        self.store
            .finalize_execution(&execution_id, status, &snapshot, Some(Utc::now()))
            .await?;
        info!(execution_id = %execution_id, status = %status, "Execution finalized");

        Ok(ExecutionOutcome {
            execution_id,
            status,
            snapshot,
        })
    }
}
