//! Workflow execution engine — DAG-driven multi-agent orchestration.
//!
//! A workflow is a directed acyclic graph of agent nodes connected by
//! data-dependency edges. The `Dag` materializes and validates the graph,
//! the `Scheduler` drives every node to a terminal state with independent
//! subgraphs running concurrently, the snapshot builder collapses the run
//! into an immutable record, and the replay planner derives new executions
//! from recorded snapshots with selected step outputs overridden.

pub mod dag;
pub mod replay;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;

pub use dag::{Dag, DagNode};
pub use replay::{plan_replay, ReplayOutcome, StepOverride};
pub use runtime::{ExecutionOutcome, WorkflowRuntime};
pub use scheduler::{DispatchState, NodeResult, Scheduler};
pub use snapshot::build_snapshot;
