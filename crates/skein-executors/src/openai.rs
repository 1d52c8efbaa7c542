use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use skein_core::config::ModelConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::Executor;
use skein_core::types::{CallMessage, CallResult, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const ERROR_BODY_LIMIT: usize = 512;

/// OpenAI-compatible chat-completions executor.
///
/// Works against OpenAI and compatible servers (Ollama, vLLM, gateways) via
/// `with_base_url`. One non-streaming request per call; usage and latency
/// are populated on the result.
pub struct OpenAiExecutor {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiExecutor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the executor at a compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl Executor for OpenAiExecutor {
    fn name(&self) -> &str {
        "openai"
    }

    fn execute(
        &self,
        message: CallMessage,
        config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        let mut body = serde_json::json!({
            "model": config.model,
            "messages": [{ "role": message.role, "content": message.content }],
            "temperature": config.temperature,
        });
        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(top_p) = config.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        Box::pin(async move {
            let started = Instant::now();

            let response = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(&body)
                .send()
                .await
                .map_err(|e| SkeinError::Executor(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SkeinError::Provider {
                    status: status.as_u16(),
                    body: truncate(&body, ERROR_BODY_LIMIT),
                });
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| SkeinError::Executor(format!("decode response: {e}")))?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| SkeinError::Executor("no choices returned".to_string()))?;

            let latency_ms = started.elapsed().as_millis() as u64;
            debug!(
                total_tokens = parsed.usage.total_tokens,
                latency_ms,
                "Chat completion returned"
            );

            Ok(CallResult {
                content: choice.message.content.unwrap_or_default(),
                tool_calls: vec![],
                usage: TokenUsage {
                    prompt_tokens: parsed.usage.prompt_tokens,
                    completion_tokens: parsed.usage.completion_tokens,
                    total_tokens: parsed.usage.total_tokens,
                },
                latency_ms,
            })
        })
    }
}

/// Truncate an error body for the domain error, keeping char boundaries.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}
