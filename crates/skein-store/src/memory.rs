use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::{AgentStore, ExecutionStore};
use skein_core::types::{
    Agent, AgentId, Execution, ExecutionId, ExecutionStatus, Snapshot, WorkflowId,
};

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<String, Agent>>,
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&self, agent: Agent) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        agents.insert(agent.id.0.clone(), agent);
    }

    /// Look up one execution record.
    pub fn execution(&self, id: &ExecutionId) -> Option<Execution> {
        let executions = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        executions.get(&id.0).cloned()
    }

    /// All execution records, unordered.
    pub fn list_executions(&self) -> Vec<Execution> {
        let executions = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        executions.values().cloned().collect()
    }
}

impl AgentStore for MemoryStore {
    fn get_agent(&self, id: &AgentId) -> BoxFuture<'_, Result<Agent>> {
        let id = id.clone();
        Box::pin(async move {
            let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
            agents
                .get(&id.0)
                .cloned()
                .ok_or_else(|| SkeinError::AgentNotFound(id.0.clone()))
        })
    }
}

impl ExecutionStore for MemoryStore {
    fn create_execution(
        &self,
        id: &ExecutionId,
        workflow_id: &WorkflowId,
    ) -> BoxFuture<'_, Result<()>> {
        let execution = Execution {
            id: id.clone(),
            workflow_id: workflow_id.clone(),
            status: ExecutionStatus::Running,
            snapshot: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        Box::pin(async move {
            let mut executions = self
                .executions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            executions.insert(execution.id.0.clone(), execution);
            Ok(())
        })
    }

    fn finalize_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        snapshot: &Snapshot,
        finished_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<()>> {
        let id = id.clone();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let mut executions = self
                .executions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let execution = executions
                .get_mut(&id.0)
                .ok_or_else(|| SkeinError::ExecutionNotFound(id.0.clone()))?;
            execution.status = status;
            execution.snapshot = Some(snapshot);
            execution.finished_at = finished_at;
            Ok(())
        })
    }

    fn load_snapshot(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Snapshot>> {
        let id = id.clone();
        Box::pin(async move {
            let executions = self
                .executions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            executions
                .get(&id.0)
                .and_then(|e| e.snapshot.clone())
                .ok_or_else(|| SkeinError::ExecutionNotFound(id.0.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::config::ModelConfig;
    use skein_core::types::MetaInfo;

    fn sample_snapshot(workflow_id: &WorkflowId, execution_id: &ExecutionId) -> Snapshot {
        Snapshot {
            workflow_id: workflow_id.clone(),
            execution_id: execution_id.clone(),
            nodes: vec![],
            edges: vec![],
            execution_meta: MetaInfo::default(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_agent_roundtrip() {
        let store = MemoryStore::new();
        let agent = Agent::new("Researcher", ModelConfig::new("local", "echo"));
        let id = agent.id.clone();
        store.insert_agent(agent);

        let loaded = store.get_agent(&id).await.unwrap();
        assert_eq!(loaded.name, "Researcher");

        let missing = store.get_agent(&AgentId::from_string("nope")).await;
        assert!(matches!(missing, Err(SkeinError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let store = MemoryStore::new();
        let execution_id = ExecutionId::new();
        let workflow_id = WorkflowId::new();

        store
            .create_execution(&execution_id, &workflow_id)
            .await
            .unwrap();

        let created = store.execution(&execution_id).unwrap();
        assert_eq!(created.status, ExecutionStatus::Running);
        assert!(created.finished_at.is_none());
        assert!(created.snapshot.is_none());

        let snapshot = sample_snapshot(&workflow_id, &execution_id);
        store
            .finalize_execution(
                &execution_id,
                ExecutionStatus::Success,
                &snapshot,
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let finalized = store.execution(&execution_id).unwrap();
        assert_eq!(finalized.status, ExecutionStatus::Success);
        assert!(finalized.finished_at.is_some());

        let loaded = store.load_snapshot(&execution_id).await.unwrap();
        assert_eq!(loaded.execution_id, execution_id);
    }

    #[tokio::test]
    async fn test_load_snapshot_missing() {
        let store = MemoryStore::new();
        let result = store.load_snapshot(&ExecutionId::from_string("nope")).await;
        assert!(matches!(result, Err(SkeinError::ExecutionNotFound(_))));
    }
}
