use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use skein_core::config::RuntimeConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::AgentStore;
use skein_core::types::{CallMessage, ExecutionEvent, ExecutionId, RunSummary, Step, StepKind};
use skein_executors::ExecutorRegistry;

use crate::dag::{Dag, DagNode};

/// Lower bound on the event channel; a smaller configured capacity is
/// raised to this.
const MIN_EVENT_CAPACITY: usize = 100;

/// Per-node dispatch state. Transitions are pending → in_flight →
/// {completed, failed}, always under the state lock; the downstream walk
/// may only claim pending nodes, which is what prevents double dispatch
/// when two predecessors finish near-simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// The recorded outcome of one node execution.
#[derive(Debug)]
pub struct NodeResult {
    pub node_id: String,
    pub agent_name: String,
    pub output: String,
    pub steps: Vec<Step>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<SkeinError>,
}

impl NodeResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Shared mutable run state. Held only around map reads and writes, never
/// across I/O.
#[derive(Default)]
struct RunState {
    completed: HashSet<String>,
    dispatch: HashMap<String, DispatchState>,
    results: HashMap<String, NodeResult>,
}

struct Inner {
    dag: Dag,
    agents: Arc<dyn AgentStore>,
    executors: Arc<ExecutorRegistry>,
    execution_id: ExecutionId,
    state: RwLock<RunState>,
    event_tx: mpsc::Sender<ExecutionEvent>,
    limiter: Option<Semaphore>,
}

/// Drives one DAG to a terminal state.
///
/// One executor call per node, independent subgraphs concurrent, events on
/// a bounded channel. A scheduler owns exactly one DAG, one execution id,
/// and one event stream; all are dropped together when the run returns.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler and the receiving half of its event channel.
    pub fn new(
        dag: Dag,
        agents: Arc<dyn AgentStore>,
        executors: Arc<ExecutorRegistry>,
        execution_id: ExecutionId,
        config: &RuntimeConfig,
    ) -> (Self, mpsc::Receiver<ExecutionEvent>) {
        let capacity = config.event_capacity.max(MIN_EVENT_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        let mut dispatch = HashMap::with_capacity(dag.len());
        for id in dag.topological_sort() {
            dispatch.insert(id, DispatchState::Pending);
        }

        let scheduler = Self {
            inner: Arc::new(Inner {
                dag,
                agents,
                executors,
                execution_id,
                state: RwLock::new(RunState {
                    completed: HashSet::new(),
                    dispatch,
                    results: HashMap::new(),
                }),
                event_tx,
                limiter: config.max_concurrency.map(Semaphore::new),
            }),
        };
        (scheduler, event_rx)
    }

    pub fn dag(&self) -> &Dag {
        &self.inner.dag
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.inner.execution_id
    }

    /// Execute the workflow.
    ///
    /// Blocks until every dispatched node has reached a terminal state,
    /// then returns an error iff at least one node failed. Per-node errors
    /// are recoverable only through replay. Cancelling the token stops new
    /// dispatches and makes in-flight executor calls return `cancelled`.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        initial_input: Option<&serde_json::Value>,
    ) -> Result<()> {
        info!(execution_id = %self.inner.execution_id, nodes = self.inner.dag.len(), "Starting execution");

        if self.inner.dag.is_empty() {
            return Ok(());
        }

        // Entry nodes see the stringified initial input as their seed
        let seed: Arc<str> = match initial_input {
            Some(value) => Arc::from(serde_json::to_string(value)?),
            None => Arc::from("{}"),
        };

        let entries = self.inner.dag.entry_nodes();
        {
            let mut state = self.inner.state_write();
            for id in &entries {
                state.dispatch.insert(id.clone(), DispatchState::InFlight);
            }
        }

        let mut workers: JoinSet<Vec<String>> = JoinSet::new();
        for id in entries {
            workers.spawn(execute_node(
                Arc::clone(&self.inner),
                Arc::clone(&seed),
                cancel.clone(),
                id,
            ));
        }

        while let Some(joined) = workers.join_next().await {
            let ready = joined.map_err(|e| {
                // A panicking worker is an orchestration failure, fatal to the run
                SkeinError::Executor(format!("worker task failed: {e}"))
            })?;
            for id in ready {
                workers.spawn(execute_node(
                    Arc::clone(&self.inner),
                    Arc::clone(&seed),
                    cancel.clone(),
                    id,
                ));
            }
        }

        let (failed, total) = {
            let state = self.inner.state_read();
            let failed = state.results.values().filter(|r| !r.succeeded()).count();
            (failed, self.inner.dag.len())
        };

        if failed > 0 {
            warn!(execution_id = %self.inner.execution_id, failed, total, "Execution finished with failures");
            Err(SkeinError::RunFailed { failed, total })
        } else {
            info!(execution_id = %self.inner.execution_id, "Execution finished");
            Ok(())
        }
    }

    /// Emit the terminal `execution_complete` event. Called after `run`
    /// returns, so it strictly follows every per-node event on the channel.
    pub async fn finish(&self, summary: RunSummary) {
        self.inner
            .emit(ExecutionEvent::execution_complete(
                self.inner.execution_id.clone(),
                summary,
            ))
            .await;
    }

    /// Take ownership of the per-node results. Only terminal nodes appear;
    /// nodes stranded in `pending` by an upstream failure do not.
    pub fn take_results(&self) -> HashMap<String, NodeResult> {
        let mut state = self.inner.state_write();
        std::mem::take(&mut state.results)
    }
}

impl Inner {
    fn state_read(&self) -> RwLockReadGuard<'_, RunState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit(&self, event: ExecutionEvent) {
        // Bounded send: a slow sink backpressures the emitting worker
        // instead of dropping events.
        if self.event_tx.send(event).await.is_err() {
            debug!(execution_id = %self.execution_id, "Event channel closed, dropping event");
        }
    }

    /// Ordered input for a node: each source on its own `Input i:` line.
    /// Entry nodes have the seed as their single source; dependent nodes
    /// concatenate their dependencies' outputs in lexicographic
    /// dependency-id order. Deterministic by contract — identical upstream
    /// outputs must yield identical input strings for replay equivalence.
    fn build_input(&self, node: &DagNode, seed: &str) -> String {
        let sources: Vec<String> = if node.depends_on.is_empty() {
            vec![seed.to_string()]
        } else {
            let state = self.state_read();
            node.depends_on
                .iter()
                .filter_map(|dep| state.results.get(dep))
                .map(|result| result.output.clone())
                .collect()
        };

        let mut input = String::new();
        for (i, source) in sources.iter().enumerate() {
            input.push_str(&format!("Input {}: {}\n", i + 1, source));
        }
        input
    }

    async fn mark_failed(
        &self,
        node_id: &str,
        agent_name: Option<String>,
        error: SkeinError,
        started_at: DateTime<Utc>,
    ) {
        warn!(node_id = %node_id, error = %error, "Node failed");
        {
            let mut state = self.state_write();
            state
                .dispatch
                .insert(node_id.to_string(), DispatchState::Failed);
            state.results.insert(
                node_id.to_string(),
                NodeResult {
                    node_id: node_id.to_string(),
                    agent_name: agent_name.unwrap_or_else(|| node_id.to_string()),
                    output: String::new(),
                    steps: vec![],
                    started_at,
                    finished_at: Utc::now(),
                    error: Some(error),
                },
            );
        }
        self.emit(ExecutionEvent::node_failed(
            self.execution_id.clone(),
            node_id,
        ))
        .await;
    }

    /// Walk the completed node's downstream list and claim every node whose
    /// dependencies are all complete. Check and claim happen under one
    /// write-lock acquisition, so two predecessors completing at the same
    /// time cannot both claim a shared successor. Claims come back in
    /// lexicographic order because the downstream list is sorted.
    fn claim_ready_downstream(&self, completed_id: &str) -> Vec<String> {
        let Some(node) = self.dag.node(completed_id) else {
            return vec![];
        };

        let mut claimed = Vec::new();
        let mut state = self.state_write();
        for downstream_id in &node.downstream {
            let Some(downstream) = self.dag.node(downstream_id) else {
                continue;
            };
            let all_deps_complete = downstream
                .depends_on
                .iter()
                .all(|dep| state.completed.contains(dep));
            if all_deps_complete
                && state.dispatch.get(downstream_id) == Some(&DispatchState::Pending)
            {
                state
                    .dispatch
                    .insert(downstream_id.clone(), DispatchState::InFlight);
                claimed.push(downstream_id.clone());
            }
        }
        claimed
    }
}

/// Execute a single node, returning the downstream nodes it made ready.
async fn execute_node(
    inner: Arc<Inner>,
    seed: Arc<str>,
    cancel: CancellationToken,
    node_id: String,
) -> Vec<String> {
    let started_at = Utc::now();

    let Some(node) = inner.dag.node(&node_id) else {
        // Unreachable for a validated DAG; recorded rather than panicking
        inner
            .mark_failed(
                &node_id,
                None,
                SkeinError::InvalidGraph(format!("node `{node_id}` missing from graph")),
                started_at,
            )
            .await;
        return vec![];
    };

    let _permit = match &inner.limiter {
        Some(limiter) => limiter.acquire().await.ok(),
        None => None,
    };

    debug!(node_id = %node_id, agent_id = %node.agent_id, "Executing node");

    let agent = tokio::select! {
        _ = cancel.cancelled() => {
            inner.mark_failed(&node_id, None, SkeinError::Cancelled, started_at).await;
            return vec![];
        }
        resolved = inner.agents.get_agent(&node.agent_id) => match resolved {
            Ok(agent) => agent,
            Err(error) => {
                inner.mark_failed(&node_id, None, error, started_at).await;
                return vec![];
            }
        }
    };

    if let Err(error) = agent.model_config.validate() {
        inner
            .mark_failed(&node_id, Some(agent.name), error, started_at)
            .await;
        return vec![];
    }

    let provider = agent.model_config.provider.clone();
    let Some(executor) = inner.executors.get(&provider) else {
        inner
            .mark_failed(
                &node_id,
                Some(agent.name),
                SkeinError::ExecutorMissing(provider),
                started_at,
            )
            .await;
        return vec![];
    };

    let input = inner.build_input(node, &seed);

    inner
        .emit(ExecutionEvent::node_started(
            inner.execution_id.clone(),
            node_id.clone(),
        ))
        .await;

    let call = tokio::select! {
        _ = cancel.cancelled() => Err(SkeinError::Cancelled),
        result = executor.execute(CallMessage::user(input.clone()), &agent.model_config) => result,
    };

    let result = match call {
        Ok(result) => result,
        Err(error) => {
            inner
                .mark_failed(&node_id, Some(agent.name), error, started_at)
                .await;
            return vec![];
        }
    };

    let finished_at = Utc::now();
    let step = Step {
        step_id: Uuid::new_v4().to_string(),
        kind: StepKind::Think,
        input,
        output: result.content.clone(),
        prompt: agent.system_prompt.clone(),
        tokens: result.usage.total_tokens,
        latency_ms: result.latency_ms,
        timestamp: started_at,
        tool: None,
        arguments: None,
        extra: Default::default(),
    };

    {
        let mut state = inner.state_write();
        state.completed.insert(node_id.clone());
        state
            .dispatch
            .insert(node_id.clone(), DispatchState::Completed);
        state.results.insert(
            node_id.clone(),
            NodeResult {
                node_id: node_id.clone(),
                agent_name: agent.name.clone(),
                output: result.content.clone(),
                steps: vec![step.clone()],
                started_at,
                finished_at,
                error: None,
            },
        );
    }

    inner
        .emit(ExecutionEvent::step_complete(
            inner.execution_id.clone(),
            node_id.clone(),
            step,
        ))
        .await;

    info!(
        node_id = %node_id,
        elapsed_ms = (finished_at - started_at).num_milliseconds(),
        "Node completed"
    );

    if cancel.is_cancelled() {
        return vec![];
    }
    inner.claim_ready_downstream(&node_id)
}
