use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Agent store — resolves an agent id to its prompt and model configuration.
pub trait AgentStore: Send + Sync + 'static {
    /// Fetch an agent by id. Must be safe for concurrent use.
    fn get_agent(&self, id: &AgentId) -> BoxFuture<'_, Result<Agent>>;
}

/// Executor — the capability of making one model call for a provider.
///
/// An executor performs a single blocking call and returns one complete
/// result with usage totals populated. Implementations are side-effect-free
/// on scheduler state and must be safe for concurrent use; cancellation is
/// observed by dropping the returned future.
pub trait Executor: Send + Sync + 'static {
    /// Provider name used for registry lookup (e.g., "openai", "local").
    fn name(&self) -> &str;

    /// Perform one model call.
    fn execute(
        &self,
        message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>>;
}

/// Event sink — receives scheduler progress events for an execution.
///
/// `publish` must not block the caller; slow transports buffer or drop on
/// their own side of the contract.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, execution_id: &ExecutionId, event: &ExecutionEvent);
}

/// Execution store — the persistence collaborator.
///
/// The core invokes exactly three operations: record creation at run start,
/// a single finalize at terminal transition (or replay derivation, with
/// `finished_at = None` since `replaying` is not terminal), and snapshot
/// loading for replay.
pub trait ExecutionStore: Send + Sync + 'static {
    fn create_execution(
        &self,
        id: &ExecutionId,
        workflow_id: &WorkflowId,
    ) -> BoxFuture<'_, Result<()>>;

    fn finalize_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        snapshot: &Snapshot,
        finished_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<()>>;

    fn load_snapshot(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Snapshot>>;
}
