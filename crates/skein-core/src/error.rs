use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
    // Graph errors
    #[error("invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("cycle detected in workflow graph")]
    CycleDetected,

    // Lookup errors
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    // Executor errors
    #[error("no executor registered for provider: {0}")]
    ExecutorMissing(String),

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("executor call failed: {0}")]
    Executor(String),

    // Run errors
    #[error("execution cancelled")]
    Cancelled,

    #[error("{failed} of {total} nodes failed")]
    RunFailed { failed: usize, total: usize },

    // Config errors
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // Storage errors
    #[error("store error: {0}")]
    Store(String),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SkeinError>;
