//! End-to-end scenarios driving the runtime with stub executors and the
//! in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use skein_core::config::{ModelConfig, RuntimeConfig};
use skein_core::error::{Result, SkeinError};
use skein_core::event::ExecutionHub;
use skein_core::traits::{Executor, ExecutionStore};
use skein_core::types::{
    Agent, AgentId, CallMessage, CallResult, EdgeConfig, EventKind, ExecutionEvent, ExecutionId,
    ExecutionStatus, NodeConfig, TokenUsage, Workflow,
};
use skein_engine::{plan_replay, Dag, Scheduler, StepOverride, WorkflowRuntime};
use skein_executors::ExecutorRegistry;
use skein_store::MemoryStore;

/// Appends `|<model>` to its input. Test agents use the node id as the
/// model name, so outputs identify which node produced them.
struct SuffixExecutor;

impl Executor for SuffixExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    fn execute(
        &self,
        message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        let model = config.model.clone();
        Box::pin(async move {
            Ok(CallResult {
                content: format!("{}|{}", message.content, model),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                latency_ms: 0,
            })
        })
    }
}

/// Ignores its input and returns `<model>-out`.
struct NamedExecutor;

impl Executor for NamedExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    fn execute(
        &self,
        _message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        let model = config.model.clone();
        Box::pin(async move {
            Ok(CallResult {
                content: format!("{model}-out"),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                latency_ms: 0,
            })
        })
    }
}

/// Fails for one designated model, succeeds like `NamedExecutor` otherwise.
struct FailingExecutor {
    fail_model: String,
}

impl Executor for FailingExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    fn execute(
        &self,
        _message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        let model = config.model.clone();
        let fail = model == self.fail_model;
        Box::pin(async move {
            if fail {
                Err(SkeinError::Executor(format!("model {model} exploded")))
            } else {
                Ok(CallResult {
                    content: format!("{model}-out"),
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                    latency_ms: 0,
                })
            }
        })
    }
}

/// Sleeps long enough that only cancellation ends the call.
struct SleepyExecutor;

impl Executor for SleepyExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    fn execute(
        &self,
        _message: CallMessage,
        _config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(CallResult {
                content: "late".to_string(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                latency_ms: 5000,
            })
        })
    }
}

/// Counts invocations per model to pin down the at-most-once guarantee.
struct CountingExecutor {
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl Executor for CountingExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    fn execute(
        &self,
        _message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        let model = config.model.clone();
        let calls = Arc::clone(&self.calls);
        Box::pin(async move {
            *calls.lock().unwrap().entry(model.clone()).or_insert(0) += 1;
            Ok(CallResult {
                content: format!("{model}-out"),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                latency_ms: 0,
            })
        })
    }
}

/// Build a workflow plus a store holding one agent per node. Each agent's
/// model name is its node id, routed through the given provider.
fn setup(nodes: &[&str], edges: &[(&str, &str, &str)]) -> (Workflow, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut workflow = Workflow::new("test");
    for node_id in nodes {
        let agent = Agent::new(format!("{node_id}-agent"), ModelConfig::new("stub", *node_id));
        let agent_id = agent.id.clone();
        store.insert_agent(agent);
        workflow = workflow.with_node(NodeConfig::new(*node_id, agent_id));
    }
    for (id, source, target) in edges {
        workflow = workflow.with_edge(EdgeConfig::new(*id, *source, *target));
    }
    (workflow, store)
}

fn runtime(
    store: Arc<MemoryStore>,
    executor: impl Executor,
) -> (WorkflowRuntime, Arc<ExecutionHub>) {
    let mut registry = ExecutorRegistry::new();
    registry.register(executor);
    let hub = Arc::new(ExecutionHub::default());
    let runtime = WorkflowRuntime::new(
        Arc::<MemoryStore>::clone(&store),
        Arc::new(registry),
        store,
        Arc::<ExecutionHub>::clone(&hub),
    );
    (runtime, hub)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_linear_chain_aggregates_inputs() {
    let (workflow, store) = setup(&["n1", "n2"], &[("e1", "n1", "n2")]);
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, Some(serde_json::json!({})), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    let nodes = &outcome.snapshot.nodes;
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_id, "n1");
    assert_eq!(nodes[0].final_output, "Input 1: {}\n|n1");
    assert_eq!(nodes[1].node_id, "n2");
    assert_eq!(nodes[1].final_output, "Input 1: Input 1: {}\n|n1\n|n2");
    assert_eq!(outcome.snapshot.execution_meta.total_tokens, 0);

    let record = store.execution(&outcome.execution_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.finished_at.is_some());
    assert!(record.snapshot.is_some());
}

#[tokio::test]
async fn test_diamond_fan_out_and_join() {
    let (workflow, store) = setup(
        &["n1", "n2", "n3", "n4"],
        &[
            ("e1", "n1", "n2"),
            ("e2", "n1", "n3"),
            ("e3", "n2", "n4"),
            ("e4", "n3", "n4"),
        ],
    );
    let (runtime, hub) = runtime(Arc::clone(&store), NamedExecutor);

    let execution_id = ExecutionId::new();
    let mut rx = hub.subscribe(&execution_id);

    let outcome = runtime
        .execute_with_id(execution_id, &workflow, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.snapshot.nodes.len(), 4);

    // Join input concatenates both branches in lexicographic dependency order
    let n4 = &outcome.snapshot.nodes[3];
    assert_eq!(n4.node_id, "n4");
    assert_eq!(n4.steps[0].input, "Input 1: n2-out\nInput 2: n3-out\n");

    let events = drain(&mut rx);
    let index_of = |node: &str, kind: EventKind| {
        events
            .iter()
            .position(|e| e.kind == kind && e.node_id.as_deref() == Some(node))
            .unwrap()
    };

    // n2 and n3 may interleave, but both fully precede any n4 event
    let n4_started = index_of("n4", EventKind::NodeStarted);
    assert!(index_of("n2", EventKind::StepComplete) < n4_started);
    assert!(index_of("n3", EventKind::StepComplete) < n4_started);

    // The terminal event trails every per-node event
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::ExecutionComplete);
    assert_eq!(
        last.result.as_ref().unwrap().status,
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn test_cycle_rejected_before_execution() {
    let (workflow, store) = setup(
        &["n1", "n2"],
        &[("e1", "n1", "n2"), ("e2", "n2", "n1")],
    );
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let result = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SkeinError::CycleDetected)));
    // No execution record is created for a rejected graph
    assert!(store.list_executions().is_empty());
}

#[tokio::test]
async fn test_failed_node_strands_downstream() {
    let (workflow, store) = setup(
        &["n1", "n2", "n3"],
        &[("e1", "n1", "n2"), ("e2", "n2", "n3")],
    );
    let (runtime, hub) = runtime(
        Arc::clone(&store),
        FailingExecutor {
            fail_model: "n2".to_string(),
        },
    );

    let execution_id = ExecutionId::new();
    let mut rx = hub.subscribe(&execution_id);

    let outcome = runtime
        .execute_with_id(execution_id, &workflow, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);

    // Snapshot holds the two terminal nodes only; n3 stays pending forever
    let ids: Vec<&str> = outcome
        .snapshot
        .nodes
        .iter()
        .map(|n| n.node_id.as_str())
        .collect();
    assert_eq!(ids, vec!["n1", "n2"]);
    assert_eq!(outcome.snapshot.nodes[0].final_output, "n1-out");
    assert_eq!(outcome.snapshot.nodes[1].final_output, "");

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::NodeFailed && e.node_id.as_deref() == Some("n2")));
    assert!(!events.iter().any(|e| e.node_id.as_deref() == Some("n3")));

    let record = store.execution(&outcome.execution_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_replay_overrides_step_output() {
    let (workflow, store) = setup(&["n1", "n2"], &[("e1", "n1", "n2")]);
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, Some(serde_json::json!({})), CancellationToken::new())
        .await
        .unwrap();

    let n1_step = outcome.snapshot.nodes[0].steps[0].step_id.clone();
    let replay = plan_replay(
        store.as_ref(),
        &outcome.execution_id,
        &[StepOverride {
            step_id: n1_step,
            new_output: "hello".to_string(),
        }],
    )
    .await
    .unwrap();

    assert_eq!(replay.modifications_applied, 1);
    assert_ne!(replay.new_execution_id, outcome.execution_id);
    assert_eq!(replay.status, ExecutionStatus::Replaying);

    let derived = store.execution(&replay.new_execution_id).unwrap();
    assert_eq!(derived.status, ExecutionStatus::Replaying);
    assert!(derived.finished_at.is_none());

    let snapshot = derived.snapshot.unwrap();
    assert_eq!(snapshot.execution_id, replay.new_execution_id);
    assert_eq!(snapshot.edges, outcome.snapshot.edges);
    assert_eq!(snapshot.nodes[0].final_output, "hello");
    assert_eq!(snapshot.nodes[0].steps[0].output, "hello");
    // Downstream outputs are recorded, not recomputed, in this version
    assert_eq!(
        snapshot.nodes[1].final_output,
        outcome.snapshot.nodes[1].final_output
    );

    // The source snapshot is untouched
    let source = store.load_snapshot(&outcome.execution_id).await.unwrap();
    assert_eq!(source.nodes[0].final_output, "Input 1: {}\n|n1");
}

#[tokio::test]
async fn test_replay_with_no_overrides_copies_snapshot() {
    let (workflow, store) = setup(&["n1"], &[]);
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();

    let replay = plan_replay(store.as_ref(), &outcome.execution_id, &[])
        .await
        .unwrap();
    assert_eq!(replay.modifications_applied, 0);

    let mut derived = store.load_snapshot(&replay.new_execution_id).await.unwrap();
    assert_eq!(derived.execution_id, replay.new_execution_id);

    // Equal to the source except for the execution id
    derived.execution_id = outcome.execution_id.clone();
    let source = store.load_snapshot(&outcome.execution_id).await.unwrap();
    assert_eq!(
        serde_json::to_value(&derived).unwrap(),
        serde_json::to_value(&source).unwrap()
    );
}

#[tokio::test]
async fn test_replay_ignores_unknown_step_ids() {
    let (workflow, store) = setup(&["n1"], &[]);
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();

    let replay = plan_replay(
        store.as_ref(),
        &outcome.execution_id,
        &[StepOverride {
            step_id: "no-such-step".to_string(),
            new_output: "speculative".to_string(),
        }],
    )
    .await
    .unwrap();

    assert_eq!(replay.modifications_applied, 0);
    let derived = store.load_snapshot(&replay.new_execution_id).await.unwrap();
    assert_eq!(derived.nodes[0].final_output, outcome.snapshot.nodes[0].final_output);
}

#[tokio::test]
async fn test_replay_of_missing_execution() {
    let store = MemoryStore::new();
    let result = plan_replay(&store, &ExecutionId::from_string("ghost"), &[]).await;
    assert!(matches!(result, Err(SkeinError::ExecutionNotFound(_))));
}

#[tokio::test]
async fn test_cancellation_fails_in_flight_node() {
    let (workflow, store) = setup(&["n1"], &[]);
    let mut registry = ExecutorRegistry::new();
    registry.register(SleepyExecutor);

    let dag = Dag::from_workflow(&workflow).unwrap();
    let (scheduler, _events) = Scheduler::new(
        dag,
        store,
        Arc::new(registry),
        ExecutionId::new(),
        &RuntimeConfig::default(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = scheduler.run(cancel, None).await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(matches!(result, Err(SkeinError::RunFailed { failed: 1, .. })));

    let results = scheduler.take_results();
    let n1 = results.get("n1").unwrap();
    assert!(matches!(n1.error, Some(SkeinError::Cancelled)));
}

#[tokio::test]
async fn test_empty_workflow_succeeds_immediately() {
    let (workflow, store) = setup(&[], &[]);
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert!(outcome.snapshot.nodes.is_empty());
    assert_eq!(outcome.snapshot.execution_meta.total_tokens, 0);
}

#[tokio::test]
async fn test_single_node_event_sequence() {
    let (workflow, store) = setup(&["n1"], &[]);
    let (runtime, hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let execution_id = ExecutionId::new();
    let mut rx = hub.subscribe(&execution_id);

    let outcome = runtime
        .execute_with_id(execution_id, &workflow, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);

    let kinds: Vec<EventKind> = drain(&mut rx).iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::NodeStarted,
            EventKind::StepComplete,
            EventKind::ExecutionComplete,
        ]
    );
}

#[tokio::test]
async fn test_each_node_executes_at_most_once() {
    let (workflow, store) = setup(
        &["n1", "n2", "n3", "n4"],
        &[
            ("e1", "n1", "n2"),
            ("e2", "n1", "n3"),
            ("e3", "n2", "n4"),
            ("e4", "n3", "n4"),
        ],
    );
    let calls = Arc::new(Mutex::new(HashMap::new()));
    let (runtime, _hub) = runtime(
        Arc::clone(&store),
        CountingExecutor {
            calls: Arc::clone(&calls),
        },
    );

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    for node in ["n1", "n2", "n3", "n4"] {
        assert_eq!(calls.get(node), Some(&1), "node {node} ran more than once");
    }
}

#[tokio::test]
async fn test_deterministic_outputs_across_runs() {
    let (workflow, store) = setup(
        &["n1", "n2", "n3", "n4"],
        &[
            ("e1", "n1", "n2"),
            ("e2", "n1", "n3"),
            ("e3", "n2", "n4"),
            ("e4", "n3", "n4"),
        ],
    );
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let first = runtime
        .execute(&workflow, Some(serde_json::json!({})), CancellationToken::new())
        .await
        .unwrap();
    let second = runtime
        .execute(&workflow, Some(serde_json::json!({})), CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(first.execution_id, second.execution_id);
    assert_eq!(first.snapshot.nodes.len(), second.snapshot.nodes.len());
    for (a, b) in first.snapshot.nodes.iter().zip(&second.snapshot.nodes) {
        assert_eq!(a.node_id, b.node_id);
        assert_eq!(a.final_output, b.final_output);
        assert_eq!(a.steps[0].input, b.steps[0].input);
    }
    assert_eq!(
        first.snapshot.execution_meta.total_tokens,
        second.snapshot.execution_meta.total_tokens
    );
}

#[tokio::test]
async fn test_missing_provider_fails_node() {
    let (workflow, store) = setup(&["n1"], &[]);
    // Register nothing: the lookup for "stub" comes up empty
    let registry = ExecutorRegistry::new();
    let hub = Arc::new(ExecutionHub::default());
    let runtime = WorkflowRuntime::new(
        Arc::<MemoryStore>::clone(&store),
        Arc::new(registry),
        Arc::<MemoryStore>::clone(&store),
        hub,
    );

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.snapshot.nodes.len(), 1);
    assert_eq!(outcome.snapshot.nodes[0].final_output, "");
}

#[tokio::test]
async fn test_missing_agent_fails_node() {
    let store = Arc::new(MemoryStore::new());
    // Node references an agent the store has never seen
    let workflow = Workflow::new("orphan").with_node(NodeConfig::new(
        "n1",
        AgentId::from_string("ghost-agent"),
    ));
    let (runtime, _hub) = runtime(Arc::clone(&store), SuffixExecutor);

    let outcome = runtime
        .execute(&workflow, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    // Failure before agent resolution falls back to the node id as name
    assert_eq!(outcome.snapshot.nodes[0].agent_name, "n1");
}
