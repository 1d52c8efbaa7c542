use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};
use crate::types::ToolDefinition;

/// Model configuration attached to an agent.
///
/// Recognized keys are explicit fields; anything else an authoring surface
/// sends along is kept opaquely in `extra` and survives round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_temperature() -> f32 {
    0.0
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            top_p: None,
            tools: vec![],
            extra: Default::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Check the constraints the runtime relies on before dispatching a call.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(SkeinError::InvalidConfig("provider must not be empty".into()));
        }
        if self.model.is_empty() {
            return Err(SkeinError::InvalidConfig("model must not be empty".into()));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(SkeinError::InvalidConfig(format!(
                "temperature {} out of range [0, 2]",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Tunables of the execution runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Cost attributed to one token when aggregating `total_cost`.
    #[serde(default = "default_cost_per_token")]
    pub cost_per_token: f64,
    /// Capacity of the scheduler's event channel. The channel is bounded;
    /// a slow sink backpressures the emitting workers rather than dropping
    /// events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Optional cap on concurrently executing nodes. `None` lets the DAG's
    /// breadth set the ceiling.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_cost_per_token() -> f64 {
    0.00001
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cost_per_token: default_cost_per_token(),
            event_capacity: default_event_capacity(),
            max_concurrency: None,
        }
    }
}

impl RuntimeConfig {
    /// Load a runtime configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SkeinError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }
}
