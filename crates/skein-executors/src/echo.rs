use futures::future::BoxFuture;

use skein_core::config::ModelConfig;
use skein_core::error::Result;
use skein_core::traits::Executor;
use skein_core::types::{CallMessage, CallResult, TokenUsage};

/// Deterministic offline executor registered under the "local" provider.
///
/// Returns the input content unchanged with zero usage, which makes runs
/// reproducible for development and tests.
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

impl Executor for EchoExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn execute(
        &self,
        message: CallMessage,
        _config: &ModelConfig,
    ) -> BoxFuture<'_, Result<CallResult>> {
        Box::pin(async move {
            Ok(CallResult {
                content: message.content,
                tool_calls: vec![],
                usage: TokenUsage::default(),
                latency_ms: 0,
            })
        })
    }
}
