use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ModelConfig;

/// Unique workflow identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

/// Unique agent identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentId(pub String);

macro_rules! id_impls {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_impls!(WorkflowId);
id_impls!(ExecutionId);
id_impls!(AgentId);

/// A reusable configured model caller, referenced by workflow nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    pub model_config: ModelConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent with a fresh id and the current timestamps.
    pub fn new(name: impl Into<String>, model_config: ModelConfig) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            model_config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Canvas position of a node, opaque to the execution core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node of a user-authored workflow: one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub agent_id: AgentId,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, agent_id: AgentId) -> Self {
        Self {
            id: id.into(),
            agent_id,
            position: Position::default(),
            data: None,
        }
    }
}

/// A data-dependency edge: the source node's output feeds the target's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl EdgeConfig {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A named bundle of nodes and edges. `version` is bumped on every edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default)]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: String::new(),
            nodes: vec![],
            edges: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeConfig) -> Self {
        self.edges.push(edge);
        self
    }
}

/// Kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Think,
    ToolCall,
    ToolResult,
    Final,
}

/// The atomic unit of recorded work inside a node. The model-call path
/// emits exactly one `think` step per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Unrecognized fields, preserved across replay round-trips.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The recorded outcome of one node inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub final_output: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Aggregate metrics over one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaInfo {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub duration_ms: u64,
}

/// The self-contained, immutable record of one execution.
///
/// Nodes appear in the DAG's topological order; `edges` are a copy of the
/// workflow's edge list at execution time, not a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default)]
    pub execution_meta: MetaInfo,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Lifecycle status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Replaying,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Replaying => "replaying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "replaying" => Some(Self::Replaying),
            _ => None,
        }
    }

    /// Whether this status ends the execution lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted wrapper around a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeStarted,
    StepComplete,
    NodeFailed,
    ExecutionComplete,
}

/// Aggregate payload carried by the `execution_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: ExecutionStatus,
    pub execution_meta: MetaInfo,
}

/// A progress event emitted by the scheduler.
///
/// Events for one node arrive in the order
/// {`node_started`, `step_complete` | `node_failed`}; events across nodes
/// carry no global order and subscribers must key on `node_id`. The
/// `execution_complete` event strictly follows every per-node event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunSummary>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn node_started(execution_id: ExecutionId, node_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::NodeStarted,
            execution_id,
            node_id: Some(node_id.into()),
            step: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn step_complete(
        execution_id: ExecutionId,
        node_id: impl Into<String>,
        step: Step,
    ) -> Self {
        Self {
            kind: EventKind::StepComplete,
            execution_id,
            node_id: Some(node_id.into()),
            step: Some(step),
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn node_failed(execution_id: ExecutionId, node_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::NodeFailed,
            execution_id,
            node_id: Some(node_id.into()),
            step: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn execution_complete(execution_id: ExecutionId, result: RunSummary) -> Self {
        Self {
            kind: EventKind::ExecutionComplete,
            execution_id,
            node_id: None,
            step: None,
            result: Some(result),
            timestamp: Utc::now(),
        }
    }
}

/// A single message handed to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    pub role: String,
    pub content: String,
}

impl CallMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A tool/function call returned by a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token consumption of one executor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The complete result of one executor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Tool definition handed to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
