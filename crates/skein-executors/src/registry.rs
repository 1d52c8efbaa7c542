use std::collections::HashMap;
use std::sync::Arc;

use skein_core::traits::Executor;

/// Registry of available executors, keyed by provider name.
///
/// Populated once at process start; lookup is O(1). A missing provider is
/// a recoverable per-node error surfaced by the caller.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its own provider name.
    pub fn register(&mut self, executor: impl Executor) {
        let name = executor.name().to_string();
        self.executors.insert(name, Arc::new(executor));
    }

    /// Get an executor by provider name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
